//! MCP client over the streamable-HTTP transport.

use rmcp::{
    model::{
        CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject, ProtocolVersion,
        ResourceContents,
    },
    service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceError, ServiceExt},
    transport::StreamableHttpClientTransport,
};
use reqwest::Url;
use tracing::debug;

use crate::error::BotError;

use super::schema::MCPToolSchema;

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type MCPRunningService = RunningService<RoleClient, DynClientService>;

#[derive(Debug, Clone)]
pub struct MCPToolCallResult {
    pub structured_content: Option<serde_json::Value>,
    pub text_content: Option<String>,
    pub content: Vec<serde_json::Value>,
}

impl MCPToolCallResult {
    /// Server payload as-is: structured content, else joined text, else raw content.
    pub fn into_value_or_text(self) -> serde_json::Value {
        if let Some(structured) = self.structured_content {
            return structured;
        }
        if let Some(text) = self.text_content {
            return serde_json::Value::String(text);
        }
        serde_json::Value::Array(self.content)
    }
}

/// Client for one MCP server session.
pub struct MCPClient {
    session: Option<MCPRunningService>,
}

impl MCPClient {
    /// Connect and run the initialize handshake.
    pub async fn connect(endpoint: &Url) -> Result<Self, BotError> {
        debug!(host = endpoint.host_str().unwrap_or(""), "connecting to MCP server");
        let transport = StreamableHttpClientTransport::from_uri(endpoint.as_str());
        let client_info = ClientInfo {
            protocol_version: ProtocolVersion::LATEST,
            ..Default::default()
        };
        Self::from_running_service_result(client_info.into_dyn().serve(transport).await)
    }

    /// Wrap an already-initialized rmcp service.
    pub fn from_running_service(session: MCPRunningService) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn from_running_service_result(
        result: Result<MCPRunningService, ClientInitializeError>,
    ) -> Result<Self, BotError> {
        result
            .map(Self::from_running_service)
            .map_err(map_client_initialize_error)
    }

    pub fn is_closed(&self) -> bool {
        self.session.as_ref().map_or(true, |s| s.is_closed())
    }

    /// List available tools from the MCP server.
    pub async fn list_tools(&mut self) -> Result<Vec<MCPToolSchema>, BotError> {
        let session = self.session_mut()?;

        let tools = match session.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => {
                session
                    .list_tools(None)
                    .await
                    .map_err(|e| map_service_error("list_tools", e))?
                    .tools
            }
            Err(e) => return Err(map_service_error("list_tools", e)),
        };

        Ok(tools.into_iter().map(map_mcp_tool_schema).collect())
    }

    /// Execute a tool on the MCP server.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<MCPToolCallResult, BotError> {
        let arguments = coerce_tool_arguments(arguments)?;
        let session = self.session_mut()?;

        let result = session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: name.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|e| map_service_error("call_tool", e))?;

        map_call_result(name, result)
    }

    /// Cancel the running service. Idempotent.
    pub async fn close(&mut self) -> Result<(), BotError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session
            .cancel()
            .await
            .map(|reason| debug!(?reason, "MCP session closed"))
            .map_err(|e| BotError::Stream(format!("MCP session close failed: {e}")))
    }

    fn session_mut(&mut self) -> Result<&mut MCPRunningService, BotError> {
        match self.session.as_mut() {
            Some(session) if !session.is_closed() => Ok(session),
            _ => Err(BotError::Stream("MCP session is closed".into())),
        }
    }
}

fn map_mcp_tool_schema(tool: rmcp::model::Tool) -> MCPToolSchema {
    MCPToolSchema {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()),
        input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>, BotError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        serde_json::Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let parsed: serde_json::Value = serde_json::from_str(trimmed).map_err(|e| {
                BotError::InvalidArgument(format!("MCP tool arguments must be valid JSON: {e}"))
            })?;
            coerce_tool_arguments(parsed)
        }
        other => Err(BotError::InvalidArgument(format!(
            "MCP tool arguments must be a JSON object; got {other}"
        ))),
    }
}

fn extract_text_content(content: &[Content]) -> Option<String> {
    let lines: Vec<String> = content
        .iter()
        .filter_map(|item| {
            if let Some(text) = item.as_text() {
                return Some(text.text.clone());
            }
            match &item.as_resource()?.resource {
                ResourceContents::TextResourceContents { text, .. } => Some(text.clone()),
                _ => None,
            }
        })
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<MCPToolCallResult, BotError> {
    let text_content = extract_text_content(&result.content);
    let content = result
        .content
        .iter()
        .filter_map(|item| serde_json::to_value(item).ok())
        .collect::<Vec<_>>();

    if result.is_error.unwrap_or(false) {
        let message = result
            .structured_content
            .as_ref()
            .map(|v| v.to_string())
            .or(text_content)
            .unwrap_or_else(|| "MCP tool returned an error result".into());
        return Err(BotError::tool(name, message));
    }

    Ok(MCPToolCallResult {
        structured_content: result.structured_content,
        text_content,
        content,
    })
}

fn map_client_initialize_error(error: ClientInitializeError) -> BotError {
    match error {
        ClientInitializeError::ConnectionClosed(context) => {
            BotError::Stream(format!("MCP initialize connection closed: {context}"))
        }
        ClientInitializeError::TransportError { error, context } => BotError::Stream(format!(
            "MCP initialize transport error ({context}): {error}"
        )),
        ClientInitializeError::JsonRpcError(error) => BotError::Provider {
            provider: "mcp".into(),
            message: format!(
                "MCP initialize JSON-RPC error {}: {}",
                error.code.0, error.message
            ),
        },
        ClientInitializeError::Cancelled => BotError::Stream("MCP initialize cancelled".into()),
        other => BotError::Provider {
            provider: "mcp".into(),
            message: format!("MCP initialize error: {other}"),
        },
    }
}

fn map_service_error(context: &str, error: ServiceError) -> BotError {
    match error {
        ServiceError::McpError(error) => BotError::Provider {
            provider: "mcp".into(),
            message: format!("{context}: MCP error {}: {}", error.code.0, error.message),
        },
        ServiceError::TransportSend(error) => {
            BotError::Stream(format!("{context}: MCP transport send failed: {error}"))
        }
        ServiceError::TransportClosed => {
            BotError::Stream(format!("{context}: MCP transport closed"))
        }
        ServiceError::Timeout { timeout } => BotError::Timeout(timeout.as_millis() as u64),
        other => BotError::Provider {
            provider: "mcp".into(),
            message: format!("{context}: MCP service error: {other}"),
        },
    }
}
