//! Streaming types.

use serde::{Deserialize, Serialize};

use super::generation::FinishReason;
use super::usage::Usage;

/// A delta emitted during streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextStreamDelta {
    /// The incremental text chunk.
    pub text: String,
    /// Event type.
    pub event_type: StreamEventType,
    /// Tool call fragment, for `ToolCallDelta` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCallDelta>,
    /// Finish reason (only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    /// Usage (typically only on the final delta).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl TextStreamDelta {
    /// A plain text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            event_type: StreamEventType::TextDelta,
            tool_call: None,
            finish_reason: None,
            usage: None,
        }
    }

    /// A tool call fragment.
    pub fn tool_call(delta: ToolCallDelta) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::ToolCallDelta,
            tool_call: Some(delta),
            finish_reason: None,
            usage: None,
        }
    }

    /// The terminal delta of a stream.
    pub fn done(finish_reason: Option<FinishReason>, usage: Option<Usage>) -> Self {
        Self {
            text: String::new(),
            event_type: StreamEventType::Done,
            tool_call: None,
            finish_reason,
            usage,
        }
    }
}

/// A fragment of a tool call being streamed.
///
/// Fragments sharing an `index` belong to the same call; `id` and `name`
/// usually arrive on the first fragment only, `arguments` is appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// Type of stream event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    /// Incremental text content.
    TextDelta,
    /// Tool call being built.
    ToolCallDelta,
    /// Stream finished.
    Done,
}
