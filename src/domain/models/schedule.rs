//! Schedule domain model: a cron-style deferred or recurring action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ScheduleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Once,
    Recurring,
}

/// A prompt to inject into a session at a future time, once or on a cron
/// cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub session_id: super::ids::SessionId,
    pub kind: ScheduleKind,
    /// Cron expression for `Recurring`; unused for `Once`.
    pub cron_expr: Option<String>,
    pub prompt: String,
    pub next_fire_at: DateTime<Utc>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    pub fn once(session_id: super::ids::SessionId, prompt: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: ScheduleId::new(),
            session_id,
            kind: ScheduleKind::Once,
            cron_expr: None,
            prompt: prompt.into(),
            next_fire_at: at,
            last_fired_at: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn recurring(
        session_id: super::ids::SessionId,
        prompt: impl Into<String>,
        cron_expr: impl Into<String>,
        first_fire_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduleId::new(),
            session_id,
            kind: ScheduleKind::Recurring,
            cron_expr: Some(cron_expr.into()),
            prompt: prompt.into(),
            next_fire_at: first_fire_at,
            last_fired_at: None,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_fire_at
    }

    /// Record a fire. `Once` schedules disable themselves; `Recurring`
    /// schedules advance `next_fire_at` to the caller-computed next tick.
    pub fn record_fire(&mut self, now: DateTime<Utc>, next_tick: Option<DateTime<Utc>>) {
        self.last_fired_at = Some(now);
        match self.kind {
            ScheduleKind::Once => self.enabled = false,
            ScheduleKind::Recurring => {
                if let Some(next) = next_tick {
                    self.next_fire_at = next;
                } else {
                    self.enabled = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::ids::SessionId;

    #[test]
    fn once_schedule_disables_after_firing() {
        let mut s = Schedule::once(SessionId::new(), "wake up", Utc::now());
        assert!(s.is_due(Utc::now()));
        s.record_fire(Utc::now(), None);
        assert!(!s.enabled);
    }

    #[test]
    fn recurring_schedule_advances_next_fire() {
        let now = Utc::now();
        let mut s = Schedule::recurring(SessionId::new(), "poll", "0 * * * *", now);
        let next = now + chrono::Duration::hours(1);
        s.record_fire(now, Some(next));
        assert!(s.enabled);
        assert_eq!(s.next_fire_at, next);
    }
}
