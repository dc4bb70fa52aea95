//! LLM provider port: the abstraction the orchestrator programs against for
//! any chat-completion backend. Grounded on the teacher's `LlmSubstrate`
//! trait, generalized to a streaming chat contract plus a one-shot
//! compaction call.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::errors::UpstreamError;
use crate::domain::models::{ContentBlock, MessageContent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for ChatParameters {
    fn default() -> Self {
        Self {
            max_tokens: Some(8192),
            temperature: Some(1.0),
            thinking_budget_tokens: None,
            extra: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: crate::domain::models::Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub turns: Vec<ChatTurn>,
    pub parameters: ChatParameters,
}

/// One incremental unit of a streamed chat response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChatEvent {
    TextDelta(String),
    ContentBlock(ContentBlock),
    Usage { input_tokens: u32, output_tokens: u32 },
    Done { stop_reason: StopReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub context_window: u32,
}

/// Port for any LLM backend capable of streaming chat and one-shot
/// compaction summarization.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn initialize(&self) -> Result<(), UpstreamError>;

    async fn is_ready(&self) -> bool;

    async fn verify_credentials(&self) -> Result<(), UpstreamError>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>, UpstreamError>;

    fn get_default_model(&self) -> String;

    /// Stream a chat completion. The returned stream yields `ChatEvent`s in
    /// order, terminating with exactly one `ChatEvent::Done`.
    async fn chat(&self, request: ChatRequest) -> Result<BoxStream<'static, ChatEvent>, UpstreamError>;

    /// One-shot, non-streamed call used by the compactor to summarize a
    /// session's history into a shorter replacement.
    async fn compaction_chat(&self, request: ChatRequest) -> Result<String, UpstreamError>;

    async fn shutdown(&self) -> Result<(), UpstreamError>;
}
