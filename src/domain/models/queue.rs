//! QueuedMessage: the envelope a `MessageQueue` holds while a session's
//! worker is busy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// One pending inbound message, not yet handed to the session's worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub session_id: SessionId,
    pub channel_id: String,
    pub text: String,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn new(session_id: SessionId, channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id,
            channel_id: channel_id.into(),
            text: text.into(),
            priority: Priority::default(),
            enqueued_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_is_low_normal_high() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
    }

    #[test]
    fn new_message_defaults_to_normal_priority() {
        let m = QueuedMessage::new(SessionId::new(), "cli", "hello");
        assert_eq!(m.priority, Priority::Normal);
    }
}
