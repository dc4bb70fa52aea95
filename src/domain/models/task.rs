//! Task domain model.
//!
//! A task is a unit of user-visible work. Tasks form a dependency graph via
//! symmetric `blocked_by`/`blocks` sets, maintained by `TaskManager`
//! (`services::task_manager`), never mutated directly on a bare `Task`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use super::ids::TaskId;

/// Maximum length retained for `failure_context`; longer text is truncated.
pub const MAX_FAILURE_CONTEXT_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Deleted => "deleted",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// A discrete unit of user-visible work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub subject: String,
    pub description: String,
    /// Gerund rendering of the description, e.g. "Reading README.md".
    pub active_form: String,
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub blocked_by: BTreeSet<TaskId>,
    pub blocks: BTreeSet<TaskId>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub time_budget_ms: Option<u64>,
    pub verify_command: Option<String>,
    pub failure_context: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(subject: impl Into<String>, description: impl Into<String>) -> Self {
        let subject = subject.into();
        let description = description.into();
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            active_form: gerund_of(&subject),
            subject,
            description,
            status: TaskStatus::default(),
            owner: None,
            blocked_by: BTreeSet::new(),
            blocks: BTreeSet::new(),
            metadata: HashMap::new(),
            time_budget_ms: None,
            verify_command: None,
            failure_context: String::new(),
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_verify_command(mut self, cmd: impl Into<String>) -> Self {
        self.verify_command = Some(cmd.into());
        self
    }

    pub fn with_time_budget_ms(mut self, ms: u64) -> Self {
        self.time_budget_ms = Some(ms);
        self
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocked_by.is_empty()
    }

    /// Set `failure_context`, truncating to `MAX_FAILURE_CONTEXT_LEN` chars.
    pub fn set_failure_context(&mut self, context: impl Into<String>) {
        let context = context.into();
        self.failure_context = if context.chars().count() > MAX_FAILURE_CONTEXT_LEN {
            context.chars().take(MAX_FAILURE_CONTEXT_LEN).collect()
        } else {
            context
        };
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Render a short gerund phrase from a subject, e.g. "Read README" ->
/// "Reading README". Falls back to prefixing "Working on" when the first
/// word doesn't look like a verb we know how to inflect.
pub fn gerund_of(subject: &str) -> String {
    let mut words = subject.split_whitespace();
    let Some(first) = words.next() else {
        return "Working on task".to_string();
    };
    let rest: Vec<&str> = words.collect();
    let gerund = to_gerund(first);
    if rest.is_empty() {
        gerund
    } else {
        format!("{} {}", gerund, rest.join(" "))
    }
}

fn to_gerund(verb: &str) -> String {
    let lower = verb.to_lowercase();
    if lower.is_empty() {
        return "Working on".to_string();
    }
    if let Some(stem) = lower.strip_suffix('e') {
        if !lower.ends_with("ee") {
            return capitalize(&format!("{stem}ing"));
        }
    }
    capitalize(&format!("{lower}ing"))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
