//! Bridge MCP tools into the bot's tool system.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::BotError;
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

use super::client::{MCPClient, MCPToolCallResult};
use super::schema::{permissive_parameters, MCPToolSchema};

/// Operations the bridge needs from an MCP session.
#[async_trait]
pub trait MCPClientOps: Send {
    async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>, BotError>;
    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<MCPToolCallResult, BotError>;
    async fn close(&mut self) -> Result<(), BotError>;
}

#[async_trait]
impl MCPClientOps for MCPClient {
    async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>, BotError> {
        MCPClient::list_tools(self).await
    }

    async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<MCPToolCallResult, BotError> {
        MCPClient::call_tool(self, name, arguments).await
    }

    async fn close(&mut self) -> Result<(), BotError> {
        MCPClient::close(self).await
    }
}

/// One open MCP session, shared by every tool discovered through it.
pub struct MCPSession {
    client: Mutex<Box<dyn MCPClientOps>>,
}

impl MCPSession {
    pub fn new(client: Box<dyn MCPClientOps>) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// List the server's actions as tools bound to this session.
    pub async fn discover(self: &Arc<Self>) -> Result<Vec<MCPTool>, BotError> {
        let listed = self.client.lock().await.list_tools().await?;
        Ok(listed
            .into_iter()
            .map(|schema| MCPTool::new(self.clone(), schema))
            .collect())
    }

    async fn call(&self, name: &str, args: &ToolArguments) -> Result<serde_json::Value, BotError> {
        let result = self
            .client
            .lock()
            .await
            .call_tool(name, args.raw().clone())
            .await?;
        Ok(result.into_value_or_text())
    }

    /// Close the underlying session.
    pub async fn close(&self) -> Result<(), BotError> {
        self.client.lock().await.close().await
    }
}

/// A server action exposed as a [`Tool`].
///
/// The advertised schema keeps the server's parameter names but makes every
/// one optional and untyped; the server validates its own input.
pub struct MCPTool {
    session: Arc<MCPSession>,
    name: String,
    description: String,
    parameters: AgentToolParameters,
}

impl MCPTool {
    pub fn new(session: Arc<MCPSession>, schema: MCPToolSchema) -> Self {
        let parameters = permissive_parameters(schema.parameter_names());
        Self {
            session,
            description: schema.description.unwrap_or_else(|| schema.name.clone()),
            name: schema.name,
            parameters,
        }
    }
}

#[async_trait]
impl Tool for MCPTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &AgentToolParameters {
        &self.parameters
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolExecutionContext,
    ) -> Result<serde_json::Value, BotError> {
        ctx.status.emit(format!("Calling tool: {}...", self.name));
        self.session.call(&self.name, args).await
    }
}
