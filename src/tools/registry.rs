//! Per-request tool set: static tools merged with discovered ones.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::tool::Tool;
use crate::provider::ToolDefinition;

/// Ordered name → tool map.
///
/// Static tools are registered first and are never replaced: a discovered tool
/// whose name is already taken is skipped.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing only the given static tools.
    pub fn with_static(tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            if !registry.insert(tool.clone()) {
                warn!(tool = tool.name(), "duplicate static tool ignored");
            }
        }
        registry
    }

    /// Add discovered tools. Returns how many were accepted.
    pub fn merge_dynamic(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> usize {
        let mut accepted = 0;
        for tool in tools {
            if self.insert(tool.clone()) {
                accepted += 1;
            } else {
                warn!(tool = tool.name(), "discovered tool shadows an existing tool; skipped");
            }
        }
        debug!(accepted, total = self.tools.len(), "merged discovered tools");
        accepted
    }

    fn insert(&mut self, tool: Arc<dyn Tool>) -> bool {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return false;
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Definitions in registration order, as sent to the provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters().schema.clone(),
            })
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{AgentTool, AgentToolParameters, ToolArguments, ToolExecutionContext};
    use serde_json::json;

    fn tool(name: &str, marker: &'static str) -> Arc<dyn Tool> {
        Arc::new(AgentTool::new(
            name,
            marker,
            AgentToolParameters::empty(),
            move |_args, _ctx| async move { Ok(json!({ "from": marker })) },
        ))
    }

    #[test]
    fn static_tools_keep_registration_order() {
        let registry = ToolRegistry::with_static([tool("getWeather", "s"), tool("searchWeb", "s")]);

        assert_eq!(registry.names(), vec!["getWeather", "searchWeb"]);
        assert_eq!(registry.len(), 2);
        let defs = registry.definitions();
        assert_eq!(defs[1].name, "searchWeb");
        assert_eq!(defs[1].parameters["type"], "object");
    }

    #[tokio::test]
    async fn static_tool_wins_name_collision() {
        let mut registry = ToolRegistry::with_static([tool("searchWeb", "static")]);
        let accepted =
            registry.merge_dynamic([tool("searchWeb", "dynamic"), tool("slack_send", "dynamic")]);

        assert_eq!(accepted, 1);
        assert_eq!(registry.names(), vec!["searchWeb", "slack_send"]);

        let result = registry
            .get("searchWeb")
            .unwrap()
            .execute(&ToolArguments::new(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(result["from"], "static");
    }

    #[test]
    fn unknown_name_is_absent() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("getWeather").is_none());
    }
}
