//! Slack Web API client.

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::BotError;
use crate::provider::http::shared_client;
use crate::types::ModelMessage;

use super::events::strip_mention;

const DEFAULT_BASE_URL: &str = "https://slack.com/api";
const THREAD_HISTORY_LIMIT: &str = "50";

/// Minimal Web API client for the calls the bot makes.
#[derive(Clone)]
pub struct SlackClient {
    token: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Bot user id of the token's owner.
    pub async fn auth_test(&self) -> Result<String, BotError> {
        let response = self.post("auth.test", &serde_json::json!({})).await?;
        response
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BotError::Slack("auth.test response missing user_id".into()))
    }

    /// Post `text` into a thread. Returns the new message's `ts`.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<String, BotError> {
        let payload = serde_json::json!({
            "channel": channel,
            "thread_ts": thread_ts,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        let response = self.post("chat.postMessage", &payload).await?;
        response
            .get("ts")
            .and_then(|ts| ts.as_str())
            .map(str::to_string)
            .ok_or_else(|| BotError::Slack("chat.postMessage response missing ts".into()))
    }

    /// Set the assistant thread status line. An empty status clears it.
    pub async fn set_status(
        &self,
        channel: &str,
        thread_ts: &str,
        status: &str,
    ) -> Result<(), BotError> {
        let payload = serde_json::json!({
            "channel_id": channel,
            "thread_ts": thread_ts,
            "status": status,
        });
        self.post("assistant.threads.setStatus", &payload).await?;
        Ok(())
    }

    /// Thread replies as conversation messages, oldest first.
    ///
    /// Bot-authored replies become assistant turns; everything else is a user
    /// turn with the bot mention removed. Empty messages are skipped.
    pub async fn thread_history(
        &self,
        channel: &str,
        thread_ts: &str,
        bot_user_id: Option<&str>,
    ) -> Result<Vec<ModelMessage>, BotError> {
        let response = self
            .get(
                "conversations.replies",
                &[("channel", channel), ("ts", thread_ts), ("limit", THREAD_HISTORY_LIMIT)],
            )
            .await?;
        let replies: RepliesResponse = serde_json::from_value(response)?;

        Ok(replies
            .messages
            .into_iter()
            .filter(|m| !m.text.trim().is_empty())
            .map(|m| {
                let from_bot = m.bot_id.is_some()
                    || (bot_user_id.is_some() && m.user.as_deref() == bot_user_id);
                if from_bot {
                    ModelMessage::assistant(m.text)
                } else {
                    ModelMessage::user(strip_mention(&m.text, bot_user_id))
                }
            })
            .collect())
    }

    async fn post(
        &self,
        method: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, BotError> {
        debug!(method, "slack api call");
        let response = shared_client()
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .json(payload)
            .send()
            .await?;
        Self::read(method, response).await
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, BotError> {
        debug!(method, "slack api call");
        let response = shared_client()
            .get(format!("{}/{method}", self.base_url))
            .bearer_auth(self.token.expose_secret())
            .query(query)
            .send()
            .await?;
        Self::read(method, response).await
    }

    async fn read(method: &str, response: reqwest::Response) -> Result<serde_json::Value, BotError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Err(BotError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::api(status.as_u16(), format!("{method}: {body}")));
        }

        let body: serde_json::Value = response.json().await?;
        if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let error = body
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or("unknown");
            return Err(BotError::Slack(format!("{method}: {error}")));
        }
        Ok(body)
    }
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("token", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}
