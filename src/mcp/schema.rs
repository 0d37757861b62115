//! MCP schema types and the permissive parameter shape for discovered tools.

use serde::{Deserialize, Serialize};

use crate::tools::types::AgentToolParameters;

/// Schema for a tool exposed by an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPToolSchema {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl MCPToolSchema {
    /// Declared parameter names.
    ///
    /// Read from the input schema's `properties` keys, falling back to a
    /// top-level `params` list of names.
    pub fn parameter_names(&self) -> Vec<String> {
        if let Some(props) = self.input_schema.get("properties").and_then(|p| p.as_object()) {
            return props.keys().cloned().collect();
        }
        self.input_schema
            .get("params")
            .and_then(|p| p.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Every name becomes an optional property of unspecified shape.
pub fn permissive_parameters<I, S>(names: I) -> AgentToolParameters
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names
        .into_iter()
        .fold(AgentToolParameters::object(), |builder, name| builder.any(name))
        .build()
}
