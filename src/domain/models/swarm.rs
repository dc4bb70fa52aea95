//! Swarm domain models: transient multi-agent coordination state.
//!
//! Unlike tasks and sessions, swarm state is not expected to survive a
//! process restart — it lives in the `SwarmCoordinator`'s memory and is
//! persisted only for audit/resume-on-crash purposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::ids::{SwarmAgentId, SwarmId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmPhase {
    Planning,
    AwaitingApproval,
    Executing,
    Collecting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmAgentStatus {
    Idle,
    Working,
    Done,
    Failed,
}

/// One member of a swarm, mapped from an `AgentDefinition` at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmAgent {
    pub id: SwarmAgentId,
    pub agent_name: String,
    pub status: SwarmAgentStatus,
    pub assigned_task_ids: Vec<super::ids::TaskId>,
    pub last_message: Option<String>,
}

impl SwarmAgent {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            id: SwarmAgentId::new(),
            agent_name: agent_name.into(),
            status: SwarmAgentStatus::Idle,
            assigned_task_ids: Vec::new(),
            last_message: None,
        }
    }
}

/// One message exchanged on the swarm's internal bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmMessage {
    pub from: SwarmAgentId,
    pub to: Option<SwarmAgentId>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

/// Coordination state for one multi-agent plan/approve/execute/collect run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swarm {
    pub id: SwarmId,
    pub goal: String,
    pub phase: SwarmPhase,
    pub agents: HashMap<SwarmAgentId, SwarmAgent>,
    pub messages: Vec<SwarmMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swarm {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SwarmId::new(),
            goal: goal.into(),
            phase: SwarmPhase::Planning,
            agents: HashMap::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_agent(&mut self, agent: SwarmAgent) {
        self.agents.insert(agent.id, agent);
        self.updated_at = Utc::now();
    }

    pub fn record_message(&mut self, msg: SwarmMessage) {
        self.messages.push(msg);
        self.updated_at = Utc::now();
    }

    /// Valid phase progression: Planning -> AwaitingApproval -> Executing ->
    /// Collecting -> Completed, with a Failed escape from any non-terminal
    /// phase.
    pub fn advance(&mut self, next: SwarmPhase) -> Result<(), String> {
        use SwarmPhase::*;
        let allowed = matches!(
            (self.phase, next),
            (Planning, AwaitingApproval)
                | (Planning, Executing)
                | (AwaitingApproval, Executing)
                | (Executing, Collecting)
                | (Collecting, Completed)
                | (_, Failed)
        );
        if !allowed {
            return Err(format!("cannot advance swarm from {:?} to {:?}", self.phase, next));
        }
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_swarm_starts_in_planning_with_no_agents() {
        let s = Swarm::new("ship the feature");
        assert_eq!(s.phase, SwarmPhase::Planning);
        assert!(s.agents.is_empty());
    }

    #[test]
    fn advance_follows_the_expected_lifecycle() {
        let mut s = Swarm::new("goal");
        assert!(s.advance(SwarmPhase::AwaitingApproval).is_ok());
        assert!(s.advance(SwarmPhase::Executing).is_ok());
        assert!(s.advance(SwarmPhase::Collecting).is_ok());
        assert!(s.advance(SwarmPhase::Completed).is_ok());
    }

    #[test]
    fn advance_rejects_skipping_backwards() {
        let mut s = Swarm::new("goal");
        s.advance(SwarmPhase::Executing).unwrap();
        assert!(s.advance(SwarmPhase::Planning).is_err());
    }

    #[test]
    fn any_non_terminal_phase_can_fail() {
        let mut s = Swarm::new("goal");
        assert!(s.advance(SwarmPhase::Failed).is_ok());
    }
}
