//! Swarm coordination: per-run message bus, per-agent execution, and the
//! four-phase coordinator that ties them together.

pub mod agent_instance;
pub mod coordinator;
pub mod message_bus;

pub use agent_instance::{AgentInstanceOutcome, SwarmAgentInstance};
pub use coordinator::{ApprovalHook, AutoApproveHook, InteractiveApprovalHook, SwarmCoordinator, SwarmResult, SwarmStatus};
pub use message_bus::SwarmMessageBus;
