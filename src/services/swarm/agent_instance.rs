//! SwarmAgentInstance: drives one planned agent's execution within a
//! swarm run — drains its inbox, appends it to the task text, spawns the
//! backing subagent, and races it against a cooperative abort.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::models::{SubagentStatus, SwarmAgentId};
use crate::services::agent_registry::AgentRegistry;
use crate::services::event_bus::EventBus;
use crate::services::swarm::message_bus::SwarmMessageBus;

pub struct AgentInstanceOutcome {
    pub agent_id: SwarmAgentId,
    pub result: String,
    pub tokens_used: u64,
    pub tool_uses: u32,
    pub succeeded: bool,
}

pub struct SwarmAgentInstance {
    pub agent_id: SwarmAgentId,
    pub agent_name: String,
    registry: Arc<AgentRegistry>,
    message_bus: Arc<SwarmMessageBus>,
    events: Arc<EventBus>,
}

impl SwarmAgentInstance {
    pub fn new(
        agent_id: SwarmAgentId,
        agent_name: impl Into<String>,
        registry: Arc<AgentRegistry>,
        message_bus: Arc<SwarmMessageBus>,
        events: Arc<EventBus>,
    ) -> Self {
        Self { agent_id, agent_name: agent_name.into(), registry, message_bus, events }
    }

    /// Drain pending inter-agent messages, fold them into the task text,
    /// and drive the subagent to completion or cooperative abort.
    #[instrument(skip(self, task), fields(agent_id = %self.agent_id, agent_name = %self.agent_name))]
    pub async fn run(&self, task: &str, abort: CancellationToken) -> AgentInstanceOutcome {
        let pending = self.message_bus.get_messages(self.agent_id).await;
        let full_task = if pending.is_empty() {
            task.to_string()
        } else {
            let block = pending.iter().map(|m| format!("- {}", m.body)).collect::<Vec<_>>().join("\n");
            format!("{task}\n\nPending messages from other agents:\n{block}")
        };

        let spawn = self.registry.spawn_subagent(&self.agent_name, full_task, None);
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                warn!("swarm agent instance aborted before completion");
                self.events
                    .emit("swarm:agent-fail", serde_json::json!({ "agent_id": self.agent_id.to_string(), "agent_name": self.agent_name, "reason": "aborted" }))
                    .await;
                AgentInstanceOutcome {
                    agent_id: self.agent_id,
                    result: "aborted".to_string(),
                    tokens_used: 0,
                    tool_uses: 0,
                    succeeded: false,
                }
            }
            outcome = spawn => {
                match outcome {
                    Ok(record) if record.status == SubagentStatus::Completed => {
                        info!("swarm agent instance completed");
                        self.events
                            .emit("swarm:agent-complete", serde_json::json!({ "agent_id": self.agent_id.to_string(), "agent_name": self.agent_name }))
                            .await;
                        AgentInstanceOutcome {
                            agent_id: self.agent_id,
                            result: record.result_text.unwrap_or_default(),
                            tokens_used: record.tokens_used.unwrap_or(0),
                            tool_uses: record.tool_uses.unwrap_or(0),
                            succeeded: true,
                        }
                    }
                    Ok(record) => {
                        warn!(status = ?record.status, "swarm agent instance ended in a non-completed terminal state");
                        self.events
                            .emit(
                                "swarm:agent-fail",
                                serde_json::json!({ "agent_id": self.agent_id.to_string(), "agent_name": self.agent_name, "reason": format!("{:?}", record.status) }),
                            )
                            .await;
                        AgentInstanceOutcome {
                            agent_id: self.agent_id,
                            result: record.result_text.unwrap_or_else(|| format!("{:?}", record.status)),
                            tokens_used: record.tokens_used.unwrap_or(0),
                            tool_uses: record.tool_uses.unwrap_or(0),
                            succeeded: false,
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "swarm agent instance failed to spawn");
                        self.events
                            .emit(
                                "swarm:agent-fail",
                                serde_json::json!({ "agent_id": self.agent_id.to_string(), "agent_name": self.agent_name, "reason": err.to_string() }),
                            )
                            .await;
                        AgentInstanceOutcome {
                            agent_id: self.agent_id,
                            result: err.to_string(),
                            tokens_used: 0,
                            tool_uses: 0,
                            succeeded: false,
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentDefinition;
    use crate::infrastructure::config::SwarmConfig;
    use crate::infrastructure::database::SqliteStore;
    use crate::services::event_bus::EventBus;

    struct EchoWorker;

    #[async_trait::async_trait]
    impl crate::services::agent_registry::SubagentWorker for EchoWorker {
        async fn run(
            &self,
            _agent: &AgentDefinition,
            task: String,
            _cancel: CancellationToken,
        ) -> Result<crate::services::agent_registry::SubagentOutcome, String> {
            Ok(crate::services::agent_registry::SubagentOutcome { text: task, tokens_used: 0, tool_uses: 0 })
        }
    }

    #[tokio::test]
    async fn aborting_before_completion_yields_failed_outcome() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let registry = Arc::new(AgentRegistry::new(
            Arc::new(store.subagents.clone()),
            Arc::new(EchoWorker),
            Arc::new(EventBus::new()),
            SwarmConfig::default(),
        ));
        registry.register(AgentDefinition::new("researcher", "finds things", "You research.")).await;
        let message_bus = Arc::new(SwarmMessageBus::new(Arc::new(EventBus::new())));

        let instance = SwarmAgentInstance::new(SwarmAgentId::new(), "researcher", registry, message_bus, Arc::new(EventBus::new()));
        let abort = CancellationToken::new();
        abort.cancel();

        let outcome = instance.run("investigate the bug", abort).await;
        assert!(!outcome.succeeded);
    }
}
