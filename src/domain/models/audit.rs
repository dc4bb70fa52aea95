//! AuditEntry domain model: an append-only record of privileged actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One append-only audit record. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor: String,
    pub action: String,
    pub subject: Option<String>,
    pub detail: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(actor: impl Into<String>, action: impl Into<String>, detail: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            action: action.into(),
            subject: None,
            detail,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_entry_carries_actor_and_action() {
        let e = AuditEntry::new("system", "approval:decision", json!({"tool": "shell"}))
            .with_subject("approval:123");
        assert_eq!(e.actor, "system");
        assert_eq!(e.action, "approval:decision");
        assert_eq!(e.subject.as_deref(), Some("approval:123"));
    }
}
