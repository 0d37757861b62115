//! Non-streaming generation loop.

use tracing::{debug, info, warn};

use super::{
    execute_tool_calls, push_tool_results, resolve_text, within, GenerateTextResult,
    GenerationOptions, GenerationStep, LoopState,
};
use crate::error::BotError;
use crate::provider::{ModelProvider, ProviderRequest};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::ToolExecutionContext;
use crate::types::{AgentToolCall, FinishReason, GenerationSettings, ModelMessage, Usage};

/// Generate a reply, executing tool calls until the model answers in text.
///
/// At most `options.max_steps` provider calls are made. Exhausting the bound
/// or reaching the deadline returns the best text seen so far with
/// [`FinishReason::StepLimit`] or [`FinishReason::Timeout`].
pub async fn generate_text(
    provider: &dyn ModelProvider,
    mut messages: Vec<ModelMessage>,
    settings: GenerationSettings,
    tools: &ToolRegistry,
    options: &GenerationOptions,
) -> Result<GenerateTextResult, BotError> {
    let tool_defs = (!tools.is_empty()).then(|| tools.definitions());
    let ctx = ToolExecutionContext::new(options.status.clone());

    let mut steps: Vec<GenerationStep> = Vec::new();
    let mut usage = Usage::default();
    let mut pending: Vec<AgentToolCall> = Vec::new();
    let mut final_text = String::new();
    let mut finish_reason = None;
    let mut state = LoopState::AwaitingModel;

    while state != LoopState::Done {
        state = match state {
            LoopState::AwaitingModel => {
                if steps.len() >= options.max_steps {
                    warn!(max_steps = options.max_steps, "step bound reached");
                    finish_reason = Some(FinishReason::StepLimit);
                    LoopState::Done
                } else {
                    let request = ProviderRequest {
                        messages: messages.clone(),
                        settings: settings.clone(),
                        tools: tool_defs.clone(),
                    };
                    debug!(step = steps.len() + 1, messages = messages.len(), "calling provider");

                    match within(options.deadline, provider.generate_text(&request)).await {
                        None => {
                            warn!(step = steps.len() + 1, "deadline reached awaiting model");
                            finish_reason = Some(FinishReason::Timeout);
                            LoopState::Done
                        }
                        Some(response) => {
                            let response = response?;
                            usage.merge(&response.usage);
                            steps.push(GenerationStep {
                                text: response.text.clone(),
                                tool_calls: response.tool_calls.clone(),
                                tool_results: Vec::new(),
                                usage: response.usage,
                                finish_reason: response.finish_reason,
                            });

                            if response.tool_calls.is_empty() {
                                final_text = response.text;
                                finish_reason = response.finish_reason.or(Some(FinishReason::Stop));
                                LoopState::Done
                            } else {
                                messages.push(ModelMessage::assistant_tool_calls(
                                    &response.text,
                                    &response.tool_calls,
                                ));
                                pending = response.tool_calls;
                                LoopState::ExecutingTools
                            }
                        }
                    }
                }
            }
            LoopState::ExecutingTools => {
                let calls = std::mem::take(&mut pending);
                debug!(count = calls.len(), "executing tool calls");
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
    info!(
        steps = steps.len(),
        finish_reason = ?finish_reason,
        total_tokens = usage.total_tokens,
        "generation finished"
    );

    Ok(GenerateTextResult {
        text,
        steps,
        messages,
        usage,
        finish_reason,
    })
}
