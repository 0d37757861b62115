//! Model Context Protocol (MCP) client, tool bridge and per-request loader.

pub mod bridge;
pub mod client;
pub mod loader;
pub mod schema;

pub use bridge::{MCPClientOps, MCPSession, MCPTool};
pub use client::MCPClient;
pub use loader::{DynamicToolLoader, HttpConnector, LoadedTools, MCPConnector, ToolSession};
pub use schema::permissive_parameters;
