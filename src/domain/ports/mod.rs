//! Ports: trait boundaries between the domain/service layer and the
//! outside world (persistence, LLM transport, chat channels, MCP).

pub mod channel;
pub mod llm_provider;
pub mod mcp_client;
pub mod repositories;

pub use channel::{Attachment, Channel, InboundMessage, Subscription};
pub use llm_provider::{ChatEvent, ChatParameters, ChatRequest, ChatTurn, LlmProvider, ModelInfo, StopReason};
pub use mcp_client::{McpClient, Resource as McpResource, Tool as McpTool};
pub use repositories::{
    ApprovalRepository, AuditRepository, MemoryRepository, MessageRepository, ScheduleRepository,
    SessionRepository, StateRepository, SubagentRepository, TaskRepository,
};
