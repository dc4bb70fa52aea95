//! MCP client port, unchanged in shape from the teacher's trait since the
//! Model Context Protocol surface this crate consumes is identical.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub mime_type: Option<String>,
}

/// Client interface for Model Context Protocol servers, reached over stdio
/// transport. Concrete implementations are an external collaborator.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self, server: &str) -> Result<Vec<Tool>>;
    async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Result<Value>;
    async fn list_resources(&self, server: &str) -> Result<Vec<Resource>>;
    async fn read_resource(&self, server: &str, uri: &str) -> Result<String>;
}
