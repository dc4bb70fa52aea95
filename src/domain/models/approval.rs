//! ApprovalRequest domain model: a gate on a privileged action awaiting a
//! human decision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ApprovalId, SessionId};

/// The full decision domain: `Pending` is the "null" state before a human
/// (or the TTL) resolves the request. `AllowOnce` and `AllowSession` are
/// both affirmative but differ in scope — only `AllowSession` tells the
/// caller to stop prompting for the remainder of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    AllowOnce,
    AllowSession,
    Denied,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AllowOnce => "allow_once",
            Self::AllowSession => "allow_session",
            Self::Denied => "denied",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "allow_once" => Some(Self::AllowOnce),
            "allow_session" => Some(Self::AllowSession),
            "denied" => Some(Self::Denied),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether this decision grants the action (either scope).
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowSession)
    }
}

/// A request for human sign-off before a privileged action runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalId,
    pub tool_name: String,
    pub tool_input: Value,
    pub reason: String,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Session this request was raised on behalf of, if any. An
    /// `AllowSession` decision on a request carrying a `session_id`
    /// suppresses future prompts for that same session.
    pub session_id: Option<SessionId>,
}

impl ApprovalRequest {
    pub fn new(
        tool_name: impl Into<String>,
        tool_input: Value,
        reason: impl Into<String>,
        ttl_ms: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalId::new(),
            tool_name: tool_name.into(),
            tool_input,
            reason: reason.into(),
            status: ApprovalStatus::Pending,
            requested_at: now,
            decided_at: None,
            decided_by: None,
            expires_at: now + chrono::Duration::milliseconds(ttl_ms),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && now >= self.expires_at
    }

    /// Transition out of `Pending` into one of the three caller-decidable
    /// outcomes (`AllowOnce`, `AllowSession`, `Denied`). Errors if already
    /// decided or if `decision` isn't a legal caller decision.
    pub fn decide(&mut self, decision: ApprovalStatus, decided_by: impl Into<String>) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!(
                "approval {} already decided as {}",
                self.id,
                self.status.as_str()
            ));
        }
        if !matches!(decision, ApprovalStatus::AllowOnce | ApprovalStatus::AllowSession | ApprovalStatus::Denied) {
            return Err(format!("{} is not a valid caller decision", decision.as_str()));
        }
        self.status = decision;
        self.decided_at = Some(Utc::now());
        self.decided_by = Some(decided_by.into());
        Ok(())
    }

    pub fn expire(&mut self) {
        if !self.status.is_terminal() {
            self.status = ApprovalStatus::Timeout;
            self.decided_at = Some(Utc::now());
        }
    }
}
