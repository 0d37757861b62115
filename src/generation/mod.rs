//! Tool-augmented text generation.
//!
//! Both entry points drive the same bounded loop:
//!
//! ```text
//! AwaitingModel --no tool calls--> Done
//! AwaitingModel --tool calls-----> ExecutingTools --> AwaitingModel
//! AwaitingModel --step bound / deadline--> Done
//! ```
//!
//! Tool failures never leave the loop: unknown tools, invalid arguments and
//! execution errors are fed back to the model as error results. Only provider
//! failures are returned as `Err`.

pub mod stream;
pub mod text;

use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::status::StatusSink;
use crate::tools::arguments::ToolArguments;
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::ToolExecutionContext;
use crate::tools::validation::validate_arguments;
use crate::types::{AgentToolCall, AgentToolResult, FinishReason, ModelMessage, Usage};

pub use stream::{stream_text_with_tools, SegmentBuffer, SegmentSink};
pub use text::generate_text;

/// Reply used when the model produced no text at all.
pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't come up with an answer this time. Please try again.";

/// Default bound on model invocations per request.
pub const DEFAULT_MAX_STEPS: usize = 10;

/// Loop position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools,
    Done,
}

/// Per-request loop controls.
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Maximum model invocations.
    pub max_steps: usize,
    /// Overall request deadline; reaching it ends the loop with a best-effort result.
    pub deadline: Option<Instant>,
    pub status: StatusSink,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            deadline: None,
            status: StatusSink::none(),
        }
    }
}

impl GenerationOptions {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_status(mut self, status: StatusSink) -> Self {
        self.status = status;
        self
    }
}

/// One model invocation and the tool work it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationStep {
    pub text: String,
    pub tool_calls: Vec<AgentToolCall>,
    pub tool_results: Vec<AgentToolResult>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Outcome of a generation loop.
#[derive(Debug, Clone)]
pub struct GenerateTextResult {
    /// Final answer; never empty.
    pub text: String,
    pub steps: Vec<GenerationStep>,
    /// Full conversation including tool calls and results.
    pub messages: Vec<ModelMessage>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

/// Run `fut` unless the deadline passes first.
pub(crate) async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Pick the answer to surface: the final text, else the last non-empty
/// text from any step, else [`FALLBACK_REPLY`].
pub(crate) fn resolve_text(final_text: &str, steps: &[GenerationStep]) -> String {
    if !final_text.trim().is_empty() {
        return final_text.to_string();
    }
    steps
        .iter()
        .rev()
        .map(|s| s.text.as_str())
        .find(|t| !t.trim().is_empty())
        .unwrap_or(FALLBACK_REPLY)
        .to_string()
}

/// Execute one step's tool calls concurrently; results keep call order.
pub(crate) async fn execute_tool_calls(
    registry: &ToolRegistry,
    calls: &[AgentToolCall],
    ctx: &ToolExecutionContext,
) -> Vec<AgentToolResult> {
    join_all(calls.iter().map(|call| execute_tool_call(registry, call, ctx))).await
}

async fn execute_tool_call(
    registry: &ToolRegistry,
    call: &AgentToolCall,
    ctx: &ToolExecutionContext,
) -> AgentToolResult {
    let error = |message: String| AgentToolResult {
        tool_call_id: call.id.clone(),
        result: serde_json::json!({ "error": message }),
        is_error: true,
    };

    let Some(tool) = registry.get(&call.name) else {
        warn!(tool = %call.name, "tool not found");
        return error(format!("Tool '{}' not found", call.name));
    };

    if let Err(reason) = validate_arguments(&call.arguments, &tool.parameters().schema) {
        warn!(tool = %call.name, %reason, "invalid tool arguments");
        return error(format!("Invalid arguments for tool '{}': {reason}", call.name));
    }

    debug!(tool = %call.name, id = %call.id, "executing tool");
    match tool.execute(&ToolArguments::new(call.arguments.clone()), ctx).await {
        Ok(result) => AgentToolResult {
            tool_call_id: call.id.clone(),
            result,
            is_error: false,
        },
        Err(e) => {
            warn!(tool = %call.name, error = %e, "tool execution failed");
            error(e.to_string())
        }
    }
}

/// Append tool results to the conversation as tool-role messages.
pub(crate) fn push_tool_results(messages: &mut Vec<ModelMessage>, results: &[AgentToolResult]) {
    messages.extend(results.iter().map(|r| {
        ModelMessage::tool_result(r.tool_call_id.clone(), r.result.clone(), r.is_error)
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BotError;
    use crate::tools::{AgentTool, AgentToolParameters, Tool};
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(AgentTool::new(
                "slow",
                "sleeps then answers",
                AgentToolParameters::empty(),
                |_args, _ctx| async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("slow done"))
                },
            )),
            Arc::new(AgentTool::new(
                "echo",
                "echoes text",
                AgentToolParameters::object().string("text", "text", true).build(),
                |args, _ctx| async move { Ok(json!(args.get_str("text")?)) },
            )),
            Arc::new(AgentTool::new(
                "broken",
                "always fails",
                AgentToolParameters::empty(),
                |_args, _ctx| async { Err(BotError::tool("broken", "upstream 503")) },
            )),
        ];
        ToolRegistry::with_static(tools)
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> AgentToolCall {
        AgentToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_call_order_even_when_tools_finish_out_of_order() {
        let calls = [
            call("1", "slow", json!({})),
            call("2", "echo", json!({"text": "fast"})),
        ];
        let results = execute_tool_calls(&registry(), &calls, &ToolExecutionContext::default()).await;

        assert_eq!(results[0].tool_call_id, "1");
        assert_eq!(results[0].result, json!("slow done"));
        assert_eq!(results[1].result, json!("fast"));
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let calls = [
            call("a", "missing", json!({})),
            call("b", "echo", json!({"text": 42})),
            call("c", "broken", json!({})),
        ];
        let results = execute_tool_calls(&registry(), &calls, &ToolExecutionContext::default()).await;

        assert!(results.iter().all(|r| r.is_error));
        assert_eq!(results[0].result["error"], "Tool 'missing' not found");
        assert!(results[1].result["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid arguments for tool 'echo'"));
        assert!(results[2].result["error"].as_str().unwrap().contains("upstream 503"));
    }

    #[test]
    fn resolve_text_prefers_final_then_last_non_empty_then_fallback() {
        let step = |text: &str| GenerationStep {
            text: text.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            usage: Usage::default(),
            finish_reason: None,
        };

        assert_eq!(resolve_text("done", &[step("early")]), "done");
        assert_eq!(resolve_text("", &[step("early"), step("later"), step(" ")]), "later");
        assert_eq!(resolve_text("", &[]), FALLBACK_REPLY);
    }
}
