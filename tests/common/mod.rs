//! Shared test helpers and mock provider.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use slackbot::error::BotError;
use slackbot::provider::{ModelProvider, ProviderRequest, ProviderResponse};
use slackbot::tools::{AgentTool, AgentToolParameters, Tool};
use slackbot::types::*;

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(ProviderResponse),
    Fail { status: u16, message: String },
}

/// A mock provider that plays back scripted turns and records requests.
pub struct MockProvider {
    model_id: String,
    script: Mutex<VecDeque<Scripted>>,
    /// Tool call repeated forever once the script runs out.
    repeat: Option<AgentToolCall>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.to_string(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        },
        tool_calls: Vec::new(),
        finish_reason: Some(FinishReason::Stop),
    }
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> AgentToolCall {
    AgentToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            model_id: "mock-model".to_string(),
            script: Mutex::new(VecDeque::new()),
            repeat: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that never stops asking for `name`.
    pub fn always_calling(name: &str, arguments: serde_json::Value) -> Self {
        Self {
            repeat: Some(tool_call("call", name, arguments)),
            ..Self::new()
        }
    }

    /// Sleep this long before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a text response.
    pub fn queue_response(&self, text: &str) {
        self.push(Scripted::Reply(text_response(text)));
    }

    /// Queue a turn requesting one tool call.
    pub fn queue_tool_call(&self, id: &str, name: &str, arguments: serde_json::Value) {
        self.queue_tool_calls("", vec![tool_call(id, name, arguments)]);
    }

    /// Queue a turn requesting several tool calls, with optional leading text.
    pub fn queue_tool_calls(&self, text: &str, calls: Vec<AgentToolCall>) {
        self.push(Scripted::Reply(ProviderResponse {
            tool_calls: calls,
            finish_reason: Some(FinishReason::ToolCalls),
            ..text_response(text)
        }));
    }

    /// Queue a provider failure.
    pub fn queue_error(&self, status: u16, message: &str) {
        self.push(Scripted::Fail {
            status,
            message: message.to_string(),
        });
    }

    /// Number of model invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn push(&self, turn: Scripted) {
        self.script.lock().unwrap().push_back(turn);
    }

    async fn next(&self, request: &ProviderRequest) -> Result<ProviderResponse, BotError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail { status, message }) => Err(BotError::api(status, message)),
            None => match &self.repeat {
                Some(call) => Ok(ProviderResponse {
                    tool_calls: vec![AgentToolCall {
                        id: format!("{}_{n}", call.id),
                        ..call.clone()
                    }],
                    finish_reason: Some(FinishReason::ToolCalls),
                    ..text_response("")
                }),
                None => Ok(text_response("Mock response")),
            },
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn chunk_chars(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_name(&self) -> &str {
        "mock"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate_text(&self, request: &ProviderRequest) -> Result<ProviderResponse, BotError> {
        self.next(request).await
    }

    async fn stream_text(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<TextStreamDelta, BotError>>, BotError> {
        let response = self.next(request).await?;

        let mut deltas: Vec<TextStreamDelta> = chunk_chars(&response.text, 5)
            .into_iter()
            .map(TextStreamDelta::text)
            .collect();
        for (index, call) in response.tool_calls.iter().enumerate() {
            // Split arguments across two deltas like a real provider would.
            let args = call.arguments.to_string();
            let half = args.chars().count() / 2;
            let head: String = args.chars().take(half).collect();
            let tail: String = args.chars().skip(half).collect();
            deltas.push(TextStreamDelta::tool_call(ToolCallDelta {
                index,
                id: Some(call.id.clone()),
                name: Some(call.name.clone()),
                arguments: head,
            }));
            deltas.push(TextStreamDelta::tool_call(ToolCallDelta {
                index,
                id: None,
                name: None,
                arguments: tail,
            }));
        }
        deltas.push(TextStreamDelta::done(
            response.finish_reason,
            Some(response.usage),
        ));

        let stream = async_stream::stream! {
            for delta in deltas {
                yield Ok(delta);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Tool echoing its `text` argument; counts executions.
pub fn echo_tool(counter: Arc<AtomicUsize>) -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "echo",
        "Echo the given text",
        AgentToolParameters::object()
            .string("text", "Text to echo", true)
            .build(),
        move |args, _ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::json!({ "echo": args.get_str("text")? }))
            }
        },
    ))
}

/// Tool that always fails.
pub fn failing_tool() -> Arc<dyn Tool> {
    Arc::new(AgentTool::new(
        "flaky",
        "Always fails",
        AgentToolParameters::empty(),
        |_args, _ctx| async { Err(BotError::tool("flaky", "service unavailable")) },
    ))
}
