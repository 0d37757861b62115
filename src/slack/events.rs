//! Inbound event payloads and message extraction.
//!
//! Handles `message` events in direct messages and `app_mention` events in
//! channels. Bot-authored messages and edit/delete subtypes are dropped.

use serde::Deserialize;
use tracing::debug;

/// Outer Events API request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEnvelope {
    /// Sent once when the request URL is configured.
    UrlVerification { challenge: String },
    EventCallback(EventCallback),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCallback {
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub event_time: Option<u64>,
    pub event: serde_json::Value,
}

/// Slack event types that we handle.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    Message(MessageEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppMentionEvent {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub channel: String,
    /// `im`, `channel`, `group` or `mpim`.
    #[serde(default)]
    pub channel_type: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im") || self.channel.starts_with('D')
    }

    pub fn is_bot_message(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }
}

impl AppMentionEvent {
    pub fn is_bot_message(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }
}

/// A user message the bot should answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub user: Option<String>,
    /// Message text with the bot mention removed.
    pub text: String,
    /// Timestamp of the triggering message.
    pub ts: String,
    /// Root of the thread to reply in.
    pub thread_ts: String,
    /// Whether the message was already part of a thread.
    pub in_thread: bool,
}

/// Thread to reply in: the existing thread, else a new one under `ts`.
pub fn thread_root<'a>(ts: &'a str, thread_ts: Option<&'a str>) -> &'a str {
    thread_ts.unwrap_or(ts)
}

/// Remove the bot's mention token and trim.
///
/// Without a known bot user id, a single leading `<@...>` token is removed.
pub fn strip_mention(text: &str, bot_user_id: Option<&str>) -> String {
    match bot_user_id {
        Some(id) => text.replacen(&format!("<@{id}>"), "", 1).trim().to_string(),
        None => {
            let trimmed = text.trim_start();
            match trimmed.strip_prefix("<@").and_then(|rest| rest.find('>').map(|end| &rest[end + 1..])) {
                Some(rest) => rest.trim().to_string(),
                None => text.trim().to_string(),
            }
        }
    }
}

impl SlackEvent {
    /// Parse the inner `event` object of a callback.
    pub fn parse(value: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(value.clone()) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "unparseable event payload");
                None
            }
        }
    }

    /// The message to answer, or `None` if the event should be ignored.
    pub fn into_inbound(self, bot_user_id: Option<&str>) -> Option<InboundMessage> {
        let (channel, user, text, ts, thread_ts) = match self {
            SlackEvent::Message(msg) => {
                if msg.is_bot_message() || msg.subtype.is_some() || !msg.is_direct_message() {
                    return None;
                }
                (msg.channel, msg.user, msg.text, msg.ts, msg.thread_ts)
            }
            SlackEvent::AppMention(mention) => {
                if mention.is_bot_message() {
                    return None;
                }
                (mention.channel, mention.user, mention.text, mention.ts, mention.thread_ts)
            }
            SlackEvent::Unknown => return None,
        };

        if bot_user_id.is_some() && user.as_deref() == bot_user_id {
            return None;
        }

        let text = strip_mention(&text, bot_user_id);
        if text.is_empty() {
            return None;
        }

        Some(InboundMessage {
            thread_ts: thread_root(&ts, thread_ts.as_deref()).to_string(),
            in_thread: thread_ts.is_some(),
            channel,
            user,
            text,
            ts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn inbound(event: serde_json::Value) -> Option<InboundMessage> {
        SlackEvent::parse(&event)?.into_inbound(Some("UBOT"))
    }

    #[test]
    fn envelope_variants_parse() {
        let verification: SlackEnvelope =
            serde_json::from_value(json!({"type": "url_verification", "token": "t", "challenge": "abc"}))
                .unwrap();
        assert!(matches!(verification, SlackEnvelope::UrlVerification { challenge } if challenge == "abc"));

        let callback: SlackEnvelope = serde_json::from_value(json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {"type": "app_mention", "text": "hi", "channel": "C1", "ts": "1.0"}
        }))
        .unwrap();
        assert!(matches!(callback, SlackEnvelope::EventCallback(cb) if cb.event_id.as_deref() == Some("Ev1")));

        let other: SlackEnvelope = serde_json::from_value(json!({"type": "app_rate_limited"})).unwrap();
        assert!(matches!(other, SlackEnvelope::Unknown));
    }

    #[test]
    fn mention_starts_a_thread_under_its_own_ts() {
        let msg = inbound(json!({
            "type": "app_mention",
            "user": "U1",
            "text": "<@UBOT> what's the weather in Oslo?",
            "channel": "C1",
            "ts": "1700000000.000100"
        }))
        .unwrap();

        assert_eq!(
            msg,
            InboundMessage {
                channel: "C1".into(),
                user: Some("U1".into()),
                text: "what's the weather in Oslo?".into(),
                ts: "1700000000.000100".into(),
                thread_ts: "1700000000.000100".into(),
                in_thread: false,
            }
        );
    }

    #[test]
    fn reply_in_thread_reuses_thread_root() {
        let msg = inbound(json!({
            "type": "message",
            "channel_type": "im",
            "user": "U1",
            "text": "and tomorrow?",
            "channel": "D1",
            "ts": "1700000050.000200",
            "thread_ts": "1700000000.000100"
        }))
        .unwrap();

        assert_eq!(msg.thread_ts, "1700000000.000100");
        assert!(msg.in_thread);
    }

    #[test]
    fn bot_and_subtype_messages_are_ignored() {
        let bot = json!({"type": "message", "channel_type": "im", "bot_id": "B1", "text": "hi", "channel": "D1", "ts": "1"});
        let bot_subtype = json!({"type": "message", "channel_type": "im", "subtype": "bot_message", "text": "hi", "channel": "D1", "ts": "1"});
        let edited = json!({"type": "message", "channel_type": "im", "subtype": "message_changed", "channel": "D1", "ts": "1"});
        let own = json!({"type": "message", "channel_type": "im", "user": "UBOT", "text": "hi", "channel": "D1", "ts": "1"});

        for event in [bot, bot_subtype, edited, own] {
            assert_eq!(inbound(event), None);
        }
    }

    #[test]
    fn channel_messages_are_left_to_mention_events() {
        let event = json!({"type": "message", "channel_type": "channel", "user": "U1", "text": "<@UBOT> hi", "channel": "C1", "ts": "1"});
        assert_eq!(inbound(event), None);
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        assert_eq!(inbound(json!({"type": "reaction_added", "user": "U1"})), None);
    }

    #[test]
    fn strip_mention_handles_known_and_unknown_bot_ids() {
        assert_eq!(strip_mention("<@UBOT> hello", Some("UBOT")), "hello");
        assert_eq!(strip_mention("hey <@UBOT> there", Some("UBOT")), "hey  there");
        assert_eq!(strip_mention("<@UOTHER> hello", Some("UBOT")), "<@UOTHER> hello");
        assert_eq!(strip_mention("  <@U123|bot> hello ", None), "hello");
        assert_eq!(strip_mention("no mention", None), "no mention");
    }
}
