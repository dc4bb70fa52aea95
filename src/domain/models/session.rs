//! Session domain model.
//!
//! A session is the conversational thread backing one `ChatSession`'s
//! dialog loop. Sessions cascade-delete their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::SessionId;

/// How a `MessageQueue` handles a new inbound message while the session's
/// worker may already be processing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Deliver immediately as extra context if processing; else queue.
    Steer,
    /// Interrupt the in-flight item, drop the queue, process this one.
    Interrupt,
    /// FIFO with priority ordering, bounded length.
    Queue,
    /// Buffer for a window, then hand the whole batch to the handler.
    Collect,
}

impl Default for QueueMode {
    fn default() -> Self {
        Self::Queue
    }
}

impl QueueMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Steer => "steer",
            Self::Interrupt => "interrupt",
            Self::Queue => "queue",
            Self::Collect => "collect",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "steer" => Some(Self::Steer),
            "interrupt" => Some(Self::Interrupt),
            "queue" => Some(Self::Queue),
            "collect" => Some(Self::Collect),
            _ => None,
        }
    }
}

/// A thinking-effort hint threaded through to the LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

/// Conversational thread of an LLM loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub compaction_count: u32,
    pub total_tokens_used: u64,
    pub queue_mode: QueueMode,
    pub active_channel_id: Option<String>,
    pub current_task_id: Option<super::ids::TaskId>,
    pub thinking_level: Option<ThinkingLevel>,
    pub flags: HashMap<String, String>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            created_at: now,
            last_activity: now,
            compaction_count: 0,
            total_tokens_used: 0,
            queue_mode: QueueMode::default(),
            active_channel_id: None,
            current_task_id: None,
            thinking_level: None,
            flags: HashMap::new(),
        }
    }

    pub fn with_queue_mode(mut self, mode: QueueMode) -> Self {
        self.queue_mode = mode;
        self
    }

    /// Record activity, bumping `last_activity` and optionally token usage.
    /// `last_activity` never regresses below `created_at` (it starts there).
    pub fn touch(&mut self, tokens_used: u64) {
        self.last_activity = Utc::now();
        self.total_tokens_used += tokens_used;
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.last_activity < self.created_at {
            return Err("last_activity cannot precede created_at".to_string());
        }
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_has_last_activity_ge_created_at() {
        let s = Session::new();
        assert!(s.validate().is_ok());
        assert_eq!(s.last_activity, s.created_at);
    }

    #[test]
    fn touch_advances_last_activity_and_tokens() {
        let mut s = Session::new();
        s.touch(42);
        assert_eq!(s.total_tokens_used, 42);
        assert!(s.last_activity >= s.created_at);
    }

    #[test]
    fn queue_mode_round_trips_through_str() {
        for mode in [
            QueueMode::Steer,
            QueueMode::Interrupt,
            QueueMode::Queue,
            QueueMode::Collect,
        ] {
            assert_eq!(QueueMode::from_str(mode.as_str()), Some(mode));
        }
    }
}
