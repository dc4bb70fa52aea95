//! SQLite implementations of the domain repository ports.

pub mod approval_repository;
pub mod audit_repository;
pub mod memory_repository;
pub mod message_repository;
pub mod schedule_repository;
pub mod session_repository;
pub mod state_repository;
pub mod subagent_repository;
pub mod task_repository;

pub use approval_repository::SqliteApprovalRepository;
pub use audit_repository::SqliteAuditRepository;
pub use memory_repository::SqliteMemoryRepository;
pub use message_repository::SqliteMessageRepository;
pub use schedule_repository::SqliteScheduleRepository;
pub use session_repository::SqliteSessionRepository;
pub use state_repository::SqliteStateRepository;
pub use subagent_repository::SqliteSubagentRepository;
pub use task_repository::SqliteTaskRepository;
