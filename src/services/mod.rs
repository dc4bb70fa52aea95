//! Service layer: the concurrency fabric wired over the domain models and
//! the Store/LlmProvider/Channel ports.

pub mod agent_registry;
pub mod approval_manager;
pub mod background_task_runner;
pub mod channel_router;
pub mod chat_session;
pub mod event_bus;
pub mod message_queue;
pub mod metrics;
pub mod swarm;
pub mod task_manager;
pub mod task_verifier;

pub use agent_registry::{AgentRegistry, SubagentOutcome, SubagentWorker};
pub use approval_manager::{ApprovalManager, Decision};
pub use background_task_runner::{BackgroundTaskRunner, BackgroundWorker, SpawnOptions};
pub use channel_router::ChannelRouter;
pub use chat_session::{ChatSession, ChatSessionDeps, Complexity, ComplexityClassifier, SwarmRunner};
pub use event_bus::EventBus;
pub use message_queue::{EnqueueOutcome, MessageQueue};
pub use metrics::{AgentMetrics, MetricsCollector, MetricsSummary, SwarmMetrics};
pub use task_manager::TaskManager;
pub use task_verifier::TaskVerifier;
