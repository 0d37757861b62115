//! Streaming generation loop with incremental segment delivery.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    execute_tool_calls, push_tool_results, resolve_text, within, GenerateTextResult,
    GenerationOptions, GenerationStep, LoopState,
};
use crate::error::BotError;
use crate::provider::openai::parse_arguments;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::ToolExecutionContext;
use crate::types::{
    AgentToolCall, FinishReason, GenerationSettings, ModelMessage, StreamEventType, Usage,
};

/// Receives complete text segments as they are decoded.
#[async_trait]
pub trait SegmentSink: Send + Sync {
    async fn send_segment(&self, segment: String);
}

#[async_trait]
impl SegmentSink for mpsc::UnboundedSender<String> {
    async fn send_segment(&self, segment: String) {
        let _ = self.send(segment);
    }
}

/// Splits streamed text into segments at blank lines.
///
/// A blank line inside an open ``` fence does not end a segment.
#[derive(Debug, Default)]
pub struct SegmentBuffer {
    pending: String,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and drain every segment completed by it.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut segments = Vec::new();
        let mut search_from = 0;

        while let Some(offset) = self.pending[search_from..].find("\n\n") {
            let split = search_from + offset;
            if self.pending[..split].matches("```").count() % 2 == 1 {
                search_from = split + 2;
                continue;
            }
            let segment = self.pending[..split].trim().to_string();
            self.pending.drain(..split + 2);
            search_from = 0;
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
        segments
    }

    /// Drain whatever is left.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Default)]
struct StreamedStep {
    text: String,
    tool_calls: Vec<AgentToolCall>,
    usage: Usage,
    finish_reason: Option<FinishReason>,
    timed_out: bool,
}

struct SegmentWriter<'a> {
    buffer: SegmentBuffer,
    sink: &'a dyn SegmentSink,
    sent: usize,
}

impl SegmentWriter<'_> {
    async fn write(&mut self, text: &str) {
        for segment in self.buffer.push(text) {
            self.send(segment).await;
        }
    }

    async fn flush(&mut self) {
        if let Some(rest) = self.buffer.finish() {
            self.send(rest).await;
        }
    }

    async fn send(&mut self, segment: String) {
        self.sent += 1;
        self.sink.send_segment(segment).await;
    }
}

async fn consume_step(
    provider: &dyn ModelProvider,
    request: &ProviderRequest,
    options: &GenerationOptions,
    writer: &mut SegmentWriter<'_>,
) -> Result<StreamedStep, BotError> {
    let mut step = StreamedStep::default();

    let Some(stream) = within(options.deadline, provider.stream_text(request)).await else {
        step.timed_out = true;
        return Ok(step);
    };
    let mut stream = stream?;
    let mut partial_calls: BTreeMap<usize, PartialToolCall> = BTreeMap::new();

    loop {
        let Some(next) = within(options.deadline, stream.next()).await else {
            step.timed_out = true;
            break;
        };
        let Some(delta) = next else {
            break;
        };
        let delta = delta?;

        match delta.event_type {
            StreamEventType::TextDelta => {
                step.text.push_str(&delta.text);
                writer.write(&delta.text).await;
            }
            StreamEventType::ToolCallDelta => {
                if let Some(tc) = delta.tool_call {
                    let entry = partial_calls.entry(tc.index).or_default();
                    if tc.id.is_some() {
                        entry.id = tc.id;
                    }
                    if let Some(name) = tc.name {
                        entry.name.get_or_insert_with(String::new).push_str(&name);
                    }
                    entry.arguments.push_str(&tc.arguments);
                }
            }
            StreamEventType::Done => {
                step.finish_reason = delta.finish_reason;
                if let Some(usage) = delta.usage {
                    step.usage = usage;
                }
            }
        }
    }

    writer.flush().await;

    step.tool_calls = partial_calls
        .into_iter()
        .filter_map(|(index, partial)| {
            let Some(name) = partial.name else {
                warn!(index, "dropping streamed tool call without a name");
                return None;
            };
            Some(AgentToolCall {
                id: partial.id.unwrap_or_else(|| format!("call_{index}")),
                name,
                arguments: parse_arguments(partial.arguments),
            })
        })
        .collect();

    Ok(step)
}

/// Streaming counterpart of [`generate_text`](super::generate_text).
///
/// Text is handed to `sink` segment by segment while each step streams.
/// Tool calls are assembled from deltas and executed between steps under the
/// same step bound and deadline. If nothing was sent by the end, the
/// fallback reply is sent so the thread never stays silent.
pub async fn stream_text_with_tools(
    provider: &dyn ModelProvider,
    mut messages: Vec<ModelMessage>,
    settings: GenerationSettings,
    tools: &ToolRegistry,
    options: &GenerationOptions,
    sink: &dyn SegmentSink,
) -> Result<GenerateTextResult, BotError> {
    let tool_defs = (!tools.is_empty()).then(|| tools.definitions());
    let ctx = ToolExecutionContext::new(options.status.clone());
    let mut writer = SegmentWriter {
        buffer: SegmentBuffer::new(),
        sink,
        sent: 0,
    };

    let mut steps: Vec<GenerationStep> = Vec::new();
    let mut usage = Usage::default();
    let mut pending: Vec<AgentToolCall> = Vec::new();
    let mut final_text = String::new();
    let mut finish_reason = None;
    let mut state = LoopState::AwaitingModel;

    while state != LoopState::Done {
        state = match state {
            LoopState::AwaitingModel if steps.len() >= options.max_steps => {
                warn!(max_steps = options.max_steps, "step bound reached");
                finish_reason = Some(FinishReason::StepLimit);
                LoopState::Done
            }
            LoopState::AwaitingModel => {
                let request = ProviderRequest {
                    messages: messages.clone(),
                    settings: settings.clone(),
                    tools: tool_defs.clone(),
                };
                debug!(step = steps.len() + 1, "streaming from provider");

                let streamed = consume_step(provider, &request, options, &mut writer).await?;
                usage.merge(&streamed.usage);
                steps.push(GenerationStep {
                    text: streamed.text.clone(),
                    tool_calls: streamed.tool_calls.clone(),
                    tool_results: Vec::new(),
                    usage: streamed.usage,
                    finish_reason: streamed.finish_reason,
                });

                if streamed.timed_out {
                    warn!(step = steps.len(), "deadline reached while streaming");
                    finish_reason = Some(FinishReason::Timeout);
                    LoopState::Done
                } else if streamed.tool_calls.is_empty() {
                    final_text = streamed.text;
                    finish_reason = streamed.finish_reason.or(Some(FinishReason::Stop));
                    LoopState::Done
                } else {
                    messages.push(ModelMessage::assistant_tool_calls(
                        &streamed.text,
                        &streamed.tool_calls,
                    ));
                    pending = streamed.tool_calls;
                    LoopState::ExecutingTools
                }
            }
            LoopState::ExecutingTools => {
                let calls = std::mem::take(&mut pending);
                match within(options.deadline, execute_tool_calls(tools, &calls, &ctx)).await {
                    None => {
                        warn!("deadline reached executing tools");
                        finish_reason = Some(FinishReason::Timeout);
                        LoopState::Done
                    }
                    Some(results) => {
                        push_tool_results(&mut messages, &results);
                        if let Some(step) = steps.last_mut() {
                            step.tool_results = results;
                        }
                        LoopState::AwaitingModel
                    }
                }
            }
            LoopState::Done => LoopState::Done,
        };
    }

    let text = resolve_text(&final_text, &steps);
    if writer.sent == 0 {
        writer.send(text.clone()).await;
    }
    info!(
        steps = steps.len(),
        segments = writer.sent,
        finish_reason = ?finish_reason,
        "streaming generation finished"
    );

    Ok(GenerateTextResult {
        text,
        steps,
        messages,
        usage,
        finish_reason,
    })
}
