//! SwarmCoordinator: drives one swarm run through its four phases —
//! plan, approve, execute, collect.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::{OrchestraError, UpstreamError};
use crate::domain::models::{AgentDefinition, SwarmAgent, SwarmId};
use crate::domain::ports::llm_provider::{ChatEvent, ChatParameters, ChatRequest, ChatTurn};
use crate::domain::ports::LlmProvider;
use crate::services::agent_registry::AgentRegistry;
use crate::services::approval_manager::ApprovalManager;
use crate::services::event_bus::EventBus;
use crate::services::metrics::{MetricsCollector, SwarmMetrics};
use crate::services::swarm::agent_instance::SwarmAgentInstance;
use crate::services::swarm::message_bus::SwarmMessageBus;

const MAX_PLANNER_OUTPUT_CHARS: usize = 4000;
const PLANNING_SYSTEM_PROMPT: &str = "Respond with ONLY a JSON array of {name, role, task} objects.";

#[derive(Debug, Clone, serde::Deserialize)]
struct PlannedAgent {
    name: String,
    role: String,
    task: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmStatus {
    Completed,
    Failed,
    Timeout,
    Denied,
}

pub struct SwarmResult {
    pub swarm_id: SwarmId,
    pub status: SwarmStatus,
    pub output: String,
    pub agent_results: HashMap<String, String>,
    pub total_tokens_used: u64,
    pub total_tool_uses: u32,
    pub duration_ms: u64,
}

/// Whether (and how) a planned swarm requires human sign-off before
/// execution. The default is auto-approve.
#[async_trait::async_trait]
pub trait ApprovalHook: Send + Sync {
    async fn approve(&self, swarm_id: SwarmId, task: &str, agent_count: usize) -> bool;
}

pub struct AutoApproveHook;

#[async_trait::async_trait]
impl ApprovalHook for AutoApproveHook {
    async fn approve(&self, _swarm_id: SwarmId, _task: &str, _agent_count: usize) -> bool {
        true
    }
}

/// Routes the approval through the shared human-decision gate, accepting
/// any reply starting with "y" (case-insensitive) as approval.
pub struct InteractiveApprovalHook {
    pub approvals: Arc<ApprovalManager>,
    pub timeout_ms: Option<i64>,
}

#[async_trait::async_trait]
impl ApprovalHook for InteractiveApprovalHook {
    async fn approve(&self, swarm_id: SwarmId, task: &str, agent_count: usize) -> bool {
        let reason = format!("swarm {swarm_id} requests approval to run {agent_count} agents for: {task}");
        match self
            .approvals
            .request_and_wait(
                "swarm_execute",
                serde_json::json!({ "swarm_id": swarm_id.to_string(), "agent_count": agent_count }),
                reason,
                self.timeout_ms,
                None,
            )
            .await
        {
            Ok(decision) => decision.is_allowed(),
            Err(_) => false,
        }
    }
}

pub struct SwarmCoordinator {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<AgentRegistry>,
    approval_hook: Arc<dyn ApprovalHook>,
    metrics: Option<Arc<MetricsCollector>>,
    events: Arc<EventBus>,
    max_agents: usize,
    swarm_timeout_ms: u64,
    stop: CancellationToken,
}

impl SwarmCoordinator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<AgentRegistry>,
        approval_hook: Arc<dyn ApprovalHook>,
        metrics: Option<Arc<MetricsCollector>>,
        events: Arc<EventBus>,
        max_agents: usize,
        swarm_timeout_ms: u64,
    ) -> Self {
        Self {
            llm,
            registry,
            approval_hook,
            metrics,
            events,
            max_agents,
            swarm_timeout_ms,
            stop: CancellationToken::new(),
        }
    }

    /// Idempotent cooperative stop: aborts every in-flight instance and the
    /// swarm-wide deadline.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    #[instrument(skip(self, goal), err)]
    pub async fn run(&self, goal: &str) -> Result<SwarmResult, OrchestraError> {
        let swarm_id = SwarmId::new();
        let started = std::time::Instant::now();

        let planned = self.plan(goal).await;
        let agent_count = planned.len();

        let approved = self.approval_hook.approve(swarm_id, goal, agent_count).await;
        if !approved {
            return Ok(SwarmResult {
                swarm_id,
                status: SwarmStatus::Denied,
                output: "swarm execution denied".to_string(),
                agent_results: HashMap::new(),
                total_tokens_used: 0,
                total_tool_uses: 0,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let message_bus = Arc::new(SwarmMessageBus::new(self.events.clone()));
        let mut instances = Vec::new();
        let mut order = Vec::new();

        for planned_agent in &planned {
            self.ensure_agent_registered(planned_agent).await;
            let agent = SwarmAgent::new(planned_agent.name.clone());
            message_bus.register(agent.id).await;
            order.push((agent.id, planned_agent.clone()));
            instances.push(SwarmAgentInstance::new(
                agent.id,
                planned_agent.name.clone(),
                self.registry.clone(),
                message_bus.clone(),
                self.events.clone(),
            ));
        }

        let deadline = tokio::time::sleep(std::time::Duration::from_millis(self.swarm_timeout_ms));
        let stop = self.stop.clone();

        let mut outcomes_by_agent: HashMap<String, crate::services::swarm::agent_instance::AgentInstanceOutcome> = HashMap::new();
        let mut timed_out = false;

        tokio::select! {
            results = futures::future::join_all(instances.iter().zip(order.iter()).map(|(instance, (_, planned_agent))| {
                let abort = stop.clone();
                let task = planned_agent.task.clone();
                async move { instance.run(&task, abort).await }
            })) => {
                for ((_, planned_agent), outcome) in order.iter().zip(results.into_iter()) {
                    outcomes_by_agent.insert(planned_agent.name.clone(), outcome);
                }
            }
            _ = deadline => {
                timed_out = true;
                self.stop.cancel();
                warn!(swarm_id = %swarm_id, "swarm run hit its swarm-wide deadline");
            }
        }

        let status = if timed_out {
            SwarmStatus::Timeout
        } else if outcomes_by_agent.values().all(|o| o.succeeded) {
            SwarmStatus::Completed
        } else {
            SwarmStatus::Failed
        };

        let mut output_sections = Vec::new();
        let mut agent_results = HashMap::new();
        let mut total_tokens = 0u64;
        let mut total_tools = 0u32;

        for (_, planned_agent) in &order {
            let section = match outcomes_by_agent.get(&planned_agent.name) {
                Some(outcome) => {
                    total_tokens += outcome.tokens_used;
                    total_tools += outcome.tool_uses;
                    agent_results.insert(planned_agent.name.clone(), outcome.result.clone());
                    let status_label = if outcome.succeeded { "COMPLETED".to_string() } else { "FAILED".to_string() };
                    format!("## {} ({}) [{}]\n{}", planned_agent.name, planned_agent.role, status_label, outcome.result)
                }
                None => format!("## {} ({}) [TIMEOUT]\n(no result: swarm deadline reached)", planned_agent.name, planned_agent.role),
            };
            output_sections.push(section);
        }

        let output = output_sections.join("\n\n");
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(metrics) = &self.metrics {
            if status != SwarmStatus::Denied {
                metrics
                    .record_swarm(SwarmMetrics {
                        swarm_id,
                        agent_count,
                        total_tokens_used: total_tokens,
                        total_tool_uses: total_tools,
                        duration_ms,
                    })
                    .await;
            }
        }

        info!(swarm_id = %swarm_id, status = ?status, "swarm run finished");
        Ok(SwarmResult {
            swarm_id,
            status,
            output,
            agent_results,
            total_tokens_used: total_tokens,
            total_tool_uses: total_tools,
            duration_ms,
        })
    }

    async fn ensure_agent_registered(&self, planned: &PlannedAgent) {
        if self.registry.get_definition(&planned.name).await.is_none() {
            if let Some(general) = self.registry.get_definition("general").await {
                warn!(agent_name = %planned.name, "unregistered agent remapped to general");
                self.registry.register(AgentDefinition { name: planned.name.clone(), ..general }).await;
            } else {
                self.registry
                    .register(AgentDefinition::new(planned.name.clone(), planned.role.clone(), format!("You are {}.", planned.role)))
                    .await;
            }
        }
    }

    /// Phase 1 — ask the LLM for a JSON agent plan, falling back to a
    /// single generic agent covering the whole goal on any parse failure.
    async fn plan(&self, goal: &str) -> Vec<PlannedAgent> {
        let request = ChatRequest {
            model: self.llm.get_default_model(),
            system_prompt: Some(PLANNING_SYSTEM_PROMPT.to_string()),
            turns: vec![ChatTurn {
                role: crate::domain::models::Role::User,
                content: crate::domain::models::MessageContent::Text(goal.to_string()),
            }],
            parameters: ChatParameters::default(),
        };

        match self.collect_text(request).await {
            Ok(text) => match Self::parse_plan(&text) {
                Some(mut plan) => {
                    plan.truncate(self.max_agents);
                    for agent in &mut plan {
                        agent.name = Self::normalize_name(&agent.name);
                    }
                    plan
                }
                None => self.fallback_plan(goal),
            },
            Err(_) => self.fallback_plan(goal),
        }
    }

    fn fallback_plan(&self, goal: &str) -> Vec<PlannedAgent> {
        vec![PlannedAgent { name: "general".to_string(), role: "generalist".to_string(), task: goal.to_string() }]
    }

    fn normalize_name(name: &str) -> String {
        name.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
    }

    /// Strip accidental Markdown code fences, then parse a JSON array of
    /// planned agents.
    fn parse_plan(text: &str) -> Option<Vec<PlannedAgent>> {
        let stripped = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        serde_json::from_str(stripped).ok()
    }

    async fn collect_text(&self, request: ChatRequest) -> Result<String, UpstreamError> {
        let mut stream = self.llm.chat(request).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                ChatEvent::TextDelta(delta) => text.push_str(&delta),
                ChatEvent::Done { .. } => break,
                _ => {}
            }
        }
        if text.chars().count() > MAX_PLANNER_OUTPUT_CHARS {
            text = text.chars().take(MAX_PLANNER_OUTPUT_CHARS).collect();
        }
        Ok(text)
    }
}
