//! MessageQueue: per-session inbound-message handling, dispatched on the
//! session's configured [`QueueMode`].
//!
//! - `Steer`: while the worker is busy, new text is appended as extra
//!   context rather than queued; idle sessions deliver immediately.
//! - `Interrupt`: the in-flight item is cancelled, any queued items are
//!   dropped, and the new message is delivered immediately.
//! - `Queue`: FIFO within priority, bounded to `MAX_QUEUE_LEN`.
//! - `Collect`: messages accumulate until `drain_collect_batch` is called,
//!   which hands the whole batch to the caller at once.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::models::{Priority, QueueMode, QueuedMessage, SessionId};

/// Cap on queued (non-collect) items per session before the oldest
/// lowest-priority entry is dropped.
const MAX_QUEUE_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Hand this text to the worker immediately.
    Deliver(String),
    /// The in-flight item should be cancelled; deliver this text instead.
    Interrupt(String),
    /// Appended to the pending queue for later draining.
    Queued,
    /// Appended to the collect buffer.
    Buffered,
}

#[derive(Default)]
struct SessionQueueState {
    busy: bool,
    pending: Vec<QueuedMessage>,
    collect_buffer: Vec<QueuedMessage>,
}

pub struct MessageQueue {
    sessions: RwLock<HashMap<SessionId, SessionQueueState>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    pub async fn mark_busy(&self, session_id: SessionId) {
        self.sessions.write().await.entry(session_id).or_default().busy = true;
    }

    pub async fn mark_idle(&self, session_id: SessionId) {
        self.sessions.write().await.entry(session_id).or_default().busy = false;
    }

    pub async fn enqueue(&self, mode: QueueMode, msg: QueuedMessage) -> EnqueueOutcome {
        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(msg.session_id).or_default();

        match mode {
            QueueMode::Steer => {
                if state.busy {
                    state.pending.push(msg.clone());
                    info!(session_id = %msg.session_id, "steering extra context into in-flight turn");
                    EnqueueOutcome::Queued
                } else {
                    EnqueueOutcome::Deliver(msg.text)
                }
            }
            QueueMode::Interrupt => {
                state.pending.clear();
                state.busy = false;
                EnqueueOutcome::Interrupt(msg.text)
            }
            QueueMode::Queue => {
                state.pending.push(msg);
                if state.pending.len() > MAX_QUEUE_LEN {
                    Self::evict_lowest_priority(&mut state.pending);
                }
                if state.busy {
                    EnqueueOutcome::Queued
                } else {
                    Self::pop_highest_priority(&mut state.pending)
                        .map(|m| EnqueueOutcome::Deliver(m.text))
                        .unwrap_or(EnqueueOutcome::Queued)
                }
            }
            QueueMode::Collect => {
                state.collect_buffer.push(msg);
                EnqueueOutcome::Buffered
            }
        }
    }

    /// Pop the next queued item in priority-then-FIFO order, if any.
    pub async fn drain_next(&self, session_id: SessionId) -> Option<QueuedMessage> {
        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(session_id).or_default();
        Self::pop_highest_priority(&mut state.pending)
    }

    /// Drain the whole collect buffer at once, concatenated in arrival
    /// order. Returns `None` if nothing was buffered.
    pub async fn drain_collect_batch(&self, session_id: SessionId) -> Option<Vec<QueuedMessage>> {
        let mut sessions = self.sessions.write().await;
        let state = sessions.entry(session_id).or_default();
        if state.collect_buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut state.collect_buffer))
        }
    }

    pub async fn pending_count(&self, session_id: SessionId) -> usize {
        self.sessions.read().await.get(&session_id).map_or(0, |s| s.pending.len())
    }

    fn pop_highest_priority(pending: &mut Vec<QueuedMessage>) -> Option<QueuedMessage> {
        if pending.is_empty() {
            return None;
        }
        let (idx, _) = pending
            .iter()
            .enumerate()
            .max_by_key(|(idx, m)| (m.priority, std::cmp::Reverse(*idx)))
            .expect("non-empty checked above");
        Some(pending.remove(idx))
    }

    fn evict_lowest_priority(pending: &mut Vec<QueuedMessage>) {
        if let Some((idx, _)) = pending
            .iter()
            .enumerate()
            .min_by_key(|(idx, m)| (m.priority, std::cmp::Reverse(*idx)))
        {
            let evicted = pending.remove(idx);
            warn!(session_id = %evicted.session_id, "queue at capacity, evicted lowest-priority message");
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn steer_delivers_immediately_when_idle() {
        let q = MessageQueue::new();
        let session_id = SessionId::new();
        let msg = QueuedMessage::new(session_id, "cli", "hello");
        let outcome = q.enqueue(QueueMode::Steer, msg).await;
        assert_eq!(outcome, EnqueueOutcome::Deliver("hello".to_string()));
    }

    #[tokio::test]
    async fn steer_queues_as_context_when_busy() {
        let q = MessageQueue::new();
        let session_id = SessionId::new();
        q.mark_busy(session_id).await;
        let msg = QueuedMessage::new(session_id, "cli", "extra context");
        let outcome = q.enqueue(QueueMode::Steer, msg).await;
        assert_eq!(outcome, EnqueueOutcome::Queued);
    }

    #[tokio::test]
    async fn interrupt_clears_pending_and_delivers() {
        let q = MessageQueue::new();
        let session_id = SessionId::new();
        q.mark_busy(session_id).await;
        q.enqueue(QueueMode::Queue, QueuedMessage::new(session_id, "cli", "queued")).await;

        let outcome = q.enqueue(QueueMode::Interrupt, QueuedMessage::new(session_id, "cli", "urgent")).await;
        assert_eq!(outcome, EnqueueOutcome::Interrupt("urgent".to_string()));
        assert_eq!(q.pending_count(session_id).await, 0);
    }

    #[tokio::test]
    async fn queue_mode_drains_high_priority_first() {
        let q = MessageQueue::new();
        let session_id = SessionId::new();
        q.mark_busy(session_id).await;
        q.enqueue(QueueMode::Queue, QueuedMessage::new(session_id, "cli", "low")).await;
        q.enqueue(
            QueueMode::Queue,
            QueuedMessage::new(session_id, "cli", "urgent").with_priority(Priority::High),
        )
        .await;

        let next = q.drain_next(session_id).await.unwrap();
        assert_eq!(next.text, "urgent");
        let next = q.drain_next(session_id).await.unwrap();
        assert_eq!(next.text, "low");
    }

    #[tokio::test]
    async fn collect_buffers_until_drained() {
        let q = MessageQueue::new();
        let session_id = SessionId::new();
        q.enqueue(QueueMode::Collect, QueuedMessage::new(session_id, "cli", "a")).await;
        q.enqueue(QueueMode::Collect, QueuedMessage::new(session_id, "cli", "b")).await;

        let batch = q.drain_collect_batch(session_id).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(q.drain_collect_batch(session_id).await.is_none());
    }
}
