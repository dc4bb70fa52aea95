//! SubagentRecord domain model: one spawned subordinate LLM loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SubagentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Orphaned,
}

impl SubagentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Orphaned => "orphaned",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One spawned subordinate LLM loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentRecord {
    pub id: SubagentId,
    pub agent_name: String,
    pub parent_subagent_id: Option<SubagentId>,
    pub task_description: String,
    pub os_pid: Option<u32>,
    pub status: SubagentStatus,
    pub spawned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    pub result_text: Option<String>,
    pub tokens_used: Option<u64>,
    pub tool_uses: Option<u32>,
    /// Session id of the underlying loop, for `resumeSessionId` lookups.
    pub session_id: Option<super::ids::SessionId>,
}

impl SubagentRecord {
    pub fn new(agent_name: impl Into<String>, task_description: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            id: SubagentId::new(),
            agent_name: agent_name.into(),
            parent_subagent_id: None,
            task_description: task_description.into(),
            os_pid: None,
            status: SubagentStatus::Running,
            spawned_at: Utc::now(),
            completed_at: None,
            timeout_ms,
            result_text: None,
            tokens_used: None,
            tool_uses: None,
            session_id: None,
        }
    }

    pub fn with_parent(mut self, parent: SubagentId) -> Self {
        self.parent_subagent_id = Some(parent);
        self
    }

    fn finalize(&mut self, status: SubagentStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn complete(&mut self, result_text: impl Into<String>, tokens_used: u64, tool_uses: u32) {
        self.result_text = Some(result_text.into());
        self.tokens_used = Some(tokens_used);
        self.tool_uses = Some(tool_uses);
        self.finalize(SubagentStatus::Completed);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.result_text = Some(error.into());
        self.finalize(SubagentStatus::Failed);
    }

    pub fn timeout(&mut self) {
        self.finalize(SubagentStatus::Timeout);
    }

    pub fn orphan(&mut self) {
        self.finalize(SubagentStatus::Orphaned);
    }

    /// Invariant: exactly one terminal status, and `completed_at` is present
    /// iff that status is terminal.
    pub fn invariant_holds(&self) -> bool {
        self.status.is_terminal() == self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_running_without_completed_at() {
        let r = SubagentRecord::new("researcher", "find bugs", 300_000);
        assert_eq!(r.status, SubagentStatus::Running);
        assert!(r.completed_at.is_none());
        assert!(r.invariant_holds());
    }

    #[test]
    fn complete_sets_terminal_status_and_completed_at() {
        let mut r = SubagentRecord::new("researcher", "find bugs", 300_000);
        r.complete("done", 123, 4);
        assert_eq!(r.status, SubagentStatus::Completed);
        assert!(r.completed_at.is_some());
        assert!(r.invariant_holds());
    }

    #[test]
    fn timeout_and_fail_also_satisfy_invariant() {
        let mut a = SubagentRecord::new("x", "y", 1000);
        a.timeout();
        assert!(a.invariant_holds());

        let mut b = SubagentRecord::new("x", "y", 1000);
        b.fail("boom");
        assert!(b.invariant_holds());
    }
}
