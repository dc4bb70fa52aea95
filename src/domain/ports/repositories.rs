//! Repository ports: persistence-agnostic contracts the service layer
//! programs against. SQLite implementations live under
//! `infrastructure::database`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::StoreError;
use crate::domain::models::*;

type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> StoreResult<()>;
    async fn get(&self, id: SessionId) -> StoreResult<Option<Session>>;
    async fn update(&self, session: &Session) -> StoreResult<()>;
    async fn delete(&self, id: SessionId) -> StoreResult<()>;
    async fn list_active_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<Session>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: &Message) -> StoreResult<()>;
    async fn get(&self, id: MessageId) -> StoreResult<Option<Message>>;
    async fn list_for_session(&self, session_id: SessionId, limit: Option<u32>) -> StoreResult<Vec<Message>>;
    async fn validate_chain(&self, session_id: SessionId) -> StoreResult<ChainValidation>;
    async fn delete_for_session(&self, session_id: SessionId) -> StoreResult<u64>;
    /// Sum of `token_count` across a session's messages (NULL counted as 0).
    async fn get_token_count(&self, session_id: SessionId) -> StoreResult<u64>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> StoreResult<()>;
    async fn get(&self, id: TaskId) -> StoreResult<Option<Task>>;
    async fn update(&self, task: &Task) -> StoreResult<()>;
    async fn delete(&self, id: TaskId) -> StoreResult<()>;
    async fn list_by_status(&self, status: TaskStatus) -> StoreResult<Vec<Task>>;
    async fn list_ready(&self) -> StoreResult<Vec<Task>>;
    async fn list_all(&self) -> StoreResult<Vec<Task>>;
    /// Add `dep_id` to `task_id`'s `blocked_by` set.
    async fn add_dependency(&self, task_id: TaskId, dep_id: TaskId) -> StoreResult<()>;
    /// Remove `dep_id` from `task_id`'s `blocked_by` set.
    async fn remove_dependency(&self, task_id: TaskId, dep_id: TaskId) -> StoreResult<()>;
    /// Clear a task's owner without touching its status.
    async fn clear_owner(&self, task_id: TaskId) -> StoreResult<()>;
    /// All tasks currently `Blocked`.
    async fn get_blocked(&self) -> StoreResult<Vec<Task>>;
}

#[async_trait]
pub trait SubagentRepository: Send + Sync {
    async fn create(&self, record: &SubagentRecord) -> StoreResult<()>;
    async fn get(&self, id: SubagentId) -> StoreResult<Option<SubagentRecord>>;
    async fn update(&self, record: &SubagentRecord) -> StoreResult<()>;
    async fn list_running(&self) -> StoreResult<Vec<SubagentRecord>>;
    async fn list_children(&self, parent: SubagentId) -> StoreResult<Vec<SubagentRecord>>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn create(&self, request: &ApprovalRequest) -> StoreResult<()>;
    async fn get(&self, id: ApprovalId) -> StoreResult<Option<ApprovalRequest>>;
    async fn update(&self, request: &ApprovalRequest) -> StoreResult<()>;
    async fn list_pending(&self) -> StoreResult<Vec<ApprovalRequest>>;
    /// Requests still persisted as `pending` whose `expires_at` has already
    /// passed — distinct from [`Self::list_pending`], which returns every
    /// pending row regardless of TTL.
    async fn get_expired(&self, now: DateTime<Utc>) -> StoreResult<Vec<ApprovalRequest>>;
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> StoreResult<()>;
    async fn get(&self, id: ScheduleId) -> StoreResult<Option<Schedule>>;
    async fn update(&self, schedule: &Schedule) -> StoreResult<()>;
    async fn delete(&self, id: ScheduleId) -> StoreResult<()>;
    async fn list_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<Schedule>>;
}

/// Generic opaque key/value storage, used for small bits of state that do
/// not warrant their own entity — e.g. last-seen channel cursors.
#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, namespace: &str, key: &str, value: &str) -> StoreResult<()>;
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;
}

#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn upsert(&self, entry: &MemoryEntry) -> StoreResult<()>;
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<MemoryEntry>>;
    async fn list_namespace(&self, namespace: &str) -> StoreResult<Vec<MemoryEntry>>;
    async fn delete(&self, namespace: &str, key: &str) -> StoreResult<()>;
    /// Atomically write an entry together with its embedding vector.
    async fn store_with_embedding(&self, entry: &MemoryEntry, embedding: &[f32]) -> StoreResult<()>;
    /// Entries carrying an embedding, nearest-first by cosine distance to
    /// `query_vector`, truncated to `limit`.
    async fn search(&self, query_vector: &[f32], limit: usize) -> StoreResult<Vec<MemoryEntry>>;
    /// Delete entries whose `updated_at` is older than `older_than_ms`
    /// milliseconds ago. Returns the number of rows removed.
    async fn compact(&self, older_than_ms: i64) -> StoreResult<u64>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> StoreResult<()>;
    async fn list_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<AuditEntry>>;
}
