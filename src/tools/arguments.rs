//! Typed access to tool call arguments.

use crate::error::BotError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, BotError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| BotError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument; `null` and empty strings count as absent.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Get a float argument.
    pub fn get_f64(&self, key: &str) -> Result<f64, BotError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| BotError::InvalidArgument(format!("Missing number argument: {key}")))
    }
}
