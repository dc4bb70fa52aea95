//! Message domain model: one entry in a session's history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{MessageId, SessionId};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One block inside a structured message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// A message's body: either plain text or a typed block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten to a plain-text rendering, concatenating block text/results.
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.clone(),
                    ContentBlock::ToolUse { name, .. } => format!("[tool_use:{name}]"),
                    ContentBlock::ToolResult { content, .. } => content.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.trim().is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

/// One entry in a session's history, ordered within the session by
/// `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub session_id: SessionId,
    pub parent_message_id: Option<MessageId>,
    pub role: Role,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub token_count: Option<u32>,
}

impl Message {
    pub fn new(session_id: SessionId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            parent_message_id: None,
            role,
            content: MessageContent::Text(content.into()),
            created_at: Utc::now(),
            token_count: None,
        }
    }

    pub fn with_parent(mut self, parent: MessageId) -> Self {
        self.parent_message_id = Some(parent);
        self
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = Some(tokens);
        self
    }
}

/// Result of `MessageRepository::validate_chain`: detects cycles or
/// duplicate parent links within a session's message history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValidation {
    pub valid: bool,
    pub broken_at: Option<MessageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_content_as_text_passthrough() {
        let c = MessageContent::Text("hello".to_string());
        assert_eq!(c.as_text(), "hello");
        assert!(!c.is_empty());
    }

    #[test]
    fn empty_text_content_is_empty() {
        let c = MessageContent::Text("   ".to_string());
        assert!(c.is_empty());
    }

    #[test]
    fn blocks_flatten_in_order() {
        let c = MessageContent::Blocks(vec![
            ContentBlock::Text { text: "a".to_string() },
            ContentBlock::ToolResult {
                tool_use_id: "t1".to_string(),
                content: "b".to_string(),
                is_error: None,
            },
        ]);
        assert_eq!(c.as_text(), "a\nb");
    }

    #[test]
    fn role_round_trips_through_str() {
        for r in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            assert_eq!(Role::from_str(r.as_str()), Some(r));
        }
    }
}
