//! AgentRegistry: holds known subagent role definitions and drives spawned
//! subagent instances to a terminal state, enforcing the configured depth,
//! concurrency, and timeout limits.
//!
//! Per the concurrency model, `spawn_subagent` blocks the caller until the
//! subagent reaches a terminal state — completion, timeout, or failure is
//! resolved centrally in one place so every code path gets the same
//! persistence + event-emission treatment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::OrchestraError;
use crate::domain::models::{AgentDefinition, SubagentId, SubagentRecord};
use crate::domain::ports::SubagentRepository;
use crate::infrastructure::config::SwarmConfig;
use crate::services::event_bus::EventBus;

/// Outcome handed back by a [`SubagentWorker`] on success.
pub struct SubagentOutcome {
    pub text: String,
    pub tokens_used: u64,
    pub tool_uses: u32,
}

/// The actual LLM loop driving one subagent. Injected so `AgentRegistry`
/// never depends on a concrete model transport.
#[async_trait]
pub trait SubagentWorker: Send + Sync {
    async fn run(&self, agent: &AgentDefinition, task: String, cancel: CancellationToken) -> Result<SubagentOutcome, String>;
}

pub struct AgentRegistry {
    definitions: RwLock<HashMap<String, AgentDefinition>>,
    repo: Arc<dyn SubagentRepository>,
    worker: Arc<dyn SubagentWorker>,
    events: Arc<EventBus>,
    config: SwarmConfig,
}

impl AgentRegistry {
    pub fn new(repo: Arc<dyn SubagentRepository>, worker: Arc<dyn SubagentWorker>, events: Arc<EventBus>, config: SwarmConfig) -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
            repo,
            worker,
            events,
            config,
        }
    }

    pub async fn register(&self, definition: AgentDefinition) {
        self.definitions.write().await.insert(definition.name.clone(), definition);
    }

    pub async fn get_definition(&self, name: &str) -> Option<AgentDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    pub async fn list_definitions(&self) -> Vec<AgentDefinition> {
        self.definitions.read().await.values().cloned().collect()
    }

    /// Spawn a subagent instance of `agent_name` and drive it to
    /// completion, timeout, or failure. Rejects the spawn outright if the
    /// agent is unregistered, the swarm is already at `max_agents`, or the
    /// resulting depth would exceed `max_subagent_depth`.
    #[instrument(skip(self, task_description), err)]
    pub async fn spawn_subagent(
        &self,
        agent_name: &str,
        task_description: impl Into<String>,
        parent: Option<SubagentId>,
    ) -> Result<SubagentRecord, OrchestraError> {
        let definition = self
            .get_definition(agent_name)
            .await
            .ok_or_else(|| OrchestraError::Validation(format!("unknown agent role: {agent_name}")))?;

        let depth = self.depth_of(parent).await?;
        if depth >= self.config.max_subagent_depth {
            return Err(OrchestraError::Validation(format!(
                "spawning {agent_name} would exceed max subagent depth {}",
                self.config.max_subagent_depth
            )));
        }

        let running = self.repo.list_running().await?;
        if running.len() >= self.config.max_agents {
            return Err(OrchestraError::Validation(format!(
                "swarm already at max_agents ({})",
                self.config.max_agents
            )));
        }

        let timeout_ms = self.config.default_subagent_timeout_ms;
        let mut record = SubagentRecord::new(definition.name.clone(), task_description, timeout_ms);
        if let Some(parent_id) = parent {
            record = record.with_parent(parent_id);
        }
        self.repo.create(&record).await?;

        info!(subagent_id = %record.id, agent_name, depth, "subagent spawn");
        self.events
            .emit("subagent:spawn", serde_json::json!({ "subagent_id": record.id.to_string(), "agent_name": agent_name }))
            .await;

        let cancel = CancellationToken::new();
        let task_text = record.task_description.clone();
        let timeout = std::time::Duration::from_millis(timeout_ms);

        match tokio::time::timeout(timeout, self.worker.run(&definition, task_text, cancel.clone())).await {
            Ok(Ok(outcome)) => {
                record.complete(outcome.text, outcome.tokens_used, outcome.tool_uses);
                self.repo.update(&record).await?;
                info!(subagent_id = %record.id, "subagent complete");
                self.events
                    .emit("subagent:complete", serde_json::json!({ "subagent_id": record.id.to_string(), "success": true }))
                    .await;
            }
            Ok(Err(err)) => {
                record.fail(err);
                self.repo.update(&record).await?;
                warn!(subagent_id = %record.id, "subagent failed");
                self.events
                    .emit("subagent:complete", serde_json::json!({ "subagent_id": record.id.to_string(), "success": false }))
                    .await;
            }
            Err(_) => {
                cancel.cancel();
                record.timeout();
                self.repo.update(&record).await?;
                warn!(subagent_id = %record.id, "subagent timed out");
                self.events.emit("subagent:timeout", serde_json::json!({ "subagent_id": record.id.to_string() })).await;
            }
        }

        Ok(record)
    }

    /// Depth of a would-be child under `parent`: 0 for a top-level spawn,
    /// otherwise the parent's own depth plus one, walking the parent chain.
    async fn depth_of(&self, parent: Option<SubagentId>) -> Result<u32, OrchestraError> {
        let mut depth = 0;
        let mut current = parent;
        while let Some(id) = current {
            depth += 1;
            let record = self
                .repo
                .get(id)
                .await?
                .ok_or_else(|| OrchestraError::Validation(format!("parent subagent {id} not found")))?;
            current = record.parent_subagent_id;
        }
        Ok(depth)
    }

    /// Sweep for `Running` records that outlived their timeout despite the
    /// in-process race above — e.g. left behind by a crash — and mark them
    /// orphaned rather than leaving them running forever.
    #[instrument(skip(self))]
    pub async fn mark_orphaned(&self, older_than_ms: i64) -> Result<Vec<SubagentId>, OrchestraError> {
        let running = self.repo.list_running().await?;
        let now = chrono::Utc::now();
        let mut orphaned = Vec::new();
        for mut record in running {
            let elapsed = (now - record.spawned_at).num_milliseconds().max(0);
            if elapsed > older_than_ms {
                let id = record.id;
                record.orphan();
                self.repo.update(&record).await?;
                warn!(subagent_id = %id, elapsed_ms = elapsed, "subagent marked orphaned");
                orphaned.push(id);
            }
        }
        Ok(orphaned)
    }
}
