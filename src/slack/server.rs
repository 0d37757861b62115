//! HTTP endpoint for the Events API.
//!
//! Every callback is verified, acknowledged immediately and answered on a
//! spawned task, since Slack expects a response within three seconds.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assistant::Assistant;
use crate::config::ResponseMode;
use crate::status::StatusSink;
use crate::types::ModelMessage;

use super::client::SlackClient;
use super::events::{InboundMessage, SlackEnvelope, SlackEvent};
use super::signature;

/// Posted when generation fails outright.
pub const ERROR_REPLY: &str = "Sorry, something went wrong while generating a response.";

const SIGNATURE_HEADER: &str = "x-slack-signature";
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const RETRY_HEADER: &str = "x-slack-retry-num";

/// Longest wait for queued status updates before the reply goes out.
const STATUS_SETTLE: Duration = Duration::from_secs(5);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

struct Inner {
    assistant: Assistant,
    slack: SlackClient,
    signing_secret: SecretString,
    bot_user_id: Option<String>,
    response_mode: ResponseMode,
}

impl AppState {
    pub fn new(
        assistant: Assistant,
        slack: SlackClient,
        signing_secret: impl Into<String>,
        bot_user_id: Option<String>,
        response_mode: ResponseMode,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                assistant,
                slack,
                signing_secret: SecretString::from(signing_secret.into()),
                bot_user_id,
                response_mode,
            }),
        }
    }
}

/// `POST /api/events` and `GET /healthz`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", post(handle_events))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn handle_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let (Some(timestamp), Some(sig)) = (
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
    ) else {
        warn!("request without Slack signature headers");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let now = chrono::Utc::now().timestamp();
    if let Err(e) = signature::verify(
        state.inner.signing_secret.expose_secret(),
        timestamp,
        &body,
        sig,
        now,
    ) {
        warn!(error = %e, "rejecting unsigned request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let envelope: SlackEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed event body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let callback = match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            info!("answering URL verification");
            return Json(serde_json::json!({ "challenge": challenge })).into_response();
        }
        SlackEnvelope::EventCallback(callback) => callback,
        SlackEnvelope::Unknown => return StatusCode::OK.into_response(),
    };

    if let Some(retry) = header(&headers, RETRY_HEADER) {
        debug!(retry, event_id = ?callback.event_id, "ignoring Slack retry");
        return StatusCode::OK.into_response();
    }

    let inbound = SlackEvent::parse(&callback.event)
        .and_then(|event| event.into_inbound(state.inner.bot_user_id.as_deref()));
    let Some(inbound) = inbound else {
        debug!(event_id = ?callback.event_id, "event filtered");
        return StatusCode::OK.into_response();
    };

    let span = info_span!(
        "slack_event",
        request_id = %Uuid::new_v4(),
        event_id = callback.event_id.as_deref().unwrap_or(""),
        channel = %inbound.channel,
        thread_ts = %inbound.thread_ts,
    );
    tokio::spawn(process_message(state, inbound).instrument(span));

    StatusCode::OK.into_response()
}

/// Forward status updates to the thread's status line until every clone of
/// the sink is dropped.
fn status_forwarder(
    slack: SlackClient,
    channel: String,
    thread_ts: String,
) -> (StatusSink, JoinHandle<()>) {
    let (sink, mut rx) = StatusSink::channel();
    let task = tokio::spawn(
        async move {
            while let Some(status) = rx.recv().await {
                if let Err(e) = slack.set_status(&channel, &thread_ts, &status).await {
                    debug!(error = %e, "status update failed");
                }
            }
        }
        .in_current_span(),
    );
    (sink, task)
}

/// Let queued status updates land so none arrive after the reply.
async fn settle_status(mut forwarder: JoinHandle<()>) {
    if timeout(STATUS_SETTLE, &mut forwarder).await.is_err() {
        debug!("status updates still queued; dropping them");
        forwarder.abort();
    }
}

async fn conversation(state: &AppState, msg: &InboundMessage) -> Vec<ModelMessage> {
    if !msg.in_thread {
        return vec![ModelMessage::user(msg.text.clone())];
    }
    match state
        .inner
        .slack
        .thread_history(&msg.channel, &msg.thread_ts, state.inner.bot_user_id.as_deref())
        .await
    {
        Ok(history) if !history.is_empty() => history,
        Ok(_) => vec![ModelMessage::user(msg.text.clone())],
        Err(e) => {
            warn!(error = %e, "thread history unavailable; answering the message alone");
            vec![ModelMessage::user(msg.text.clone())]
        }
    }
}

async fn process_message(state: AppState, msg: InboundMessage) {
    info!(user = ?msg.user, "handling message");
    let slack = &state.inner.slack;
    let history = conversation(&state, &msg).await;
    let (status, forwarder) =
        status_forwarder(slack.clone(), msg.channel.clone(), msg.thread_ts.clone());

    let outcome = match state.inner.response_mode {
        ResponseMode::Complete => {
            let result = state.inner.assistant.respond(history, status).await;
            settle_status(forwarder).await;
            match result {
                Ok(result) => slack
                    .post_message(&msg.channel, &msg.thread_ts, &result.text)
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            }
        }
        ResponseMode::Stream => {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let poster = {
                let slack = slack.clone();
                let (channel, thread_ts) = (msg.channel.clone(), msg.thread_ts.clone());
                tokio::spawn(
                    async move {
                        while let Some(segment) = rx.recv().await {
                            if let Err(e) = slack.post_message(&channel, &thread_ts, &segment).await {
                                error!(error = %e, "failed to post segment");
                            }
                        }
                    }
                    .in_current_span(),
                )
            };
            let result = state
                .inner
                .assistant
                .respond_streaming(history, status, &tx)
                .await;
            drop(tx);
            if let Err(e) = poster.await {
                error!(error = %e, "segment poster task failed");
            }
            settle_status(forwarder).await;
            if let Err(e) = slack.set_status(&msg.channel, &msg.thread_ts, "").await {
                debug!(error = %e, "failed to clear status");
            }
            result.map(|_| ())
        }
    };

    if let Err(e) = outcome {
        error!(error = %e, retryable = e.is_retryable(), "failed to answer message");
        if let Err(post_err) = slack.post_message(&msg.channel, &msg.thread_ts, ERROR_REPLY).await {
            error!(error = %post_err, "failed to post error reply");
        }
    }
}
