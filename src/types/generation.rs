//! Generation settings and related enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings controlling text generation.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default)]
pub struct GenerationSettings {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: Option<u64>,
    /// End-user identifier forwarded to the provider for abuse monitoring.
    pub user: Option<String>,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    /// The step bound was reached while the model still wanted tools.
    StepLimit,
    /// The request deadline expired before the model finished.
    Timeout,
    Error,
}

impl FinishReason {
    /// Parse an OpenAI-style finish reason string.
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(Self::Stop),
            "length" => Some(Self::Length),
            "tool_calls" | "function_call" => Some(Self::ToolCalls),
            "content_filter" => Some(Self::ContentFilter),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_leaves_unset_fields_empty() {
        let settings = GenerationSettings::builder()
            .max_tokens(512)
            .maybe_user(None)
            .build();

        assert_eq!(settings.max_tokens, Some(512));
        assert!(settings.temperature.is_none());
        assert!(settings.user.is_none());
    }

    #[test]
    fn finish_reasons_map_from_provider_strings() {
        assert_eq!(FinishReason::from_provider("tool_calls"), Some(FinishReason::ToolCalls));
        assert_eq!(FinishReason::from_provider("function_call"), Some(FinishReason::ToolCalls));
        assert_eq!(FinishReason::from_provider("mystery"), None);
        assert_eq!(FinishReason::StepLimit.to_string(), "step_limit");
    }
}
