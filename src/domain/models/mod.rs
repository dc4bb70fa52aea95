//! Domain entities: plain data + invariants, no I/O.

pub mod agent_definition;
pub mod approval;
pub mod audit;
pub mod ids;
pub mod memory;
pub mod message;
pub mod queue;
pub mod schedule;
pub mod session;
pub mod subagent;
pub mod swarm;
pub mod task;

pub use agent_definition::AgentDefinition;
pub use approval::{ApprovalRequest, ApprovalStatus};
pub use audit::AuditEntry;
pub use ids::{
    ApprovalId, MemoryId, MessageId, ScheduleId, SessionId, SubagentId, SwarmAgentId, SwarmId, TaskId,
};
pub use memory::MemoryEntry;
pub use message::{ChainValidation, ContentBlock, Message, MessageContent, Role};
pub use queue::{Priority, QueuedMessage};
pub use schedule::{Schedule, ScheduleKind};
pub use session::{QueueMode, Session, ThinkingLevel};
pub use subagent::{SubagentRecord, SubagentStatus};
pub use swarm::{Swarm, SwarmAgent, SwarmAgentStatus, SwarmMessage, SwarmPhase};
pub use task::{Task, TaskStatus};
