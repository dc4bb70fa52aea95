//! MemoryEntry domain model: durable cross-session recall.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MemoryId;

/// A durable fact or preference recorded for recall in future sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: MemoryId,
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            namespace: namespace.into(),
            key: key.into(),
            value: value.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.updated_at = Utc::now();
    }
}
