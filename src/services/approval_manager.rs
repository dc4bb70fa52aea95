//! ApprovalManager: human-in-the-loop gate for tool calls that require
//! explicit operator sign-off before execution.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, instrument, warn};

use crate::domain::errors::OrchestraError;
use crate::domain::models::{ApprovalId, ApprovalRequest, ApprovalStatus, SessionId};
use crate::domain::ports::ApprovalRepository;
use crate::infrastructure::config::ApprovalConfig;
use crate::services::event_bus::EventBus;

/// The resolved outcome of an approval request: the full 5-state domain
/// from [`ApprovalStatus`].
pub type Decision = ApprovalStatus;

pub struct ApprovalManager {
    repo: Arc<dyn ApprovalRepository>,
    events: Arc<EventBus>,
    config: ApprovalConfig,
    waiters: RwLock<HashMap<ApprovalId, oneshot::Sender<Decision>>>,
    /// Sessions that have already been granted `AllowSession` on some prior
    /// request. A session landing in this set is never prompted again for
    /// the remainder of the process.
    session_grants: RwLock<HashSet<SessionId>>,
}

impl ApprovalManager {
    pub fn new(repo: Arc<dyn ApprovalRepository>, events: Arc<EventBus>, config: ApprovalConfig) -> Self {
        Self {
            repo,
            events,
            config,
            waiters: RwLock::new(HashMap::new()),
            session_grants: RwLock::new(HashSet::new()),
        }
    }

    /// Request approval and park until a decision is made or the TTL
    /// elapses, at which point the request is persisted as `timeout` and
    /// the caller receives [`ApprovalStatus::Timeout`]. If `session_id` has
    /// already been granted `AllowSession`, short-circuits to that decision
    /// without creating a new request or prompting anyone.
    #[instrument(skip(self, tool_input, reason), err)]
    pub async fn request_and_wait(
        &self,
        tool_name: &str,
        tool_input: serde_json::Value,
        reason: impl Into<String>,
        ttl_ms: Option<i64>,
        session_id: Option<SessionId>,
    ) -> Result<Decision, OrchestraError> {
        if let Some(sid) = session_id {
            if self.session_grants.read().await.contains(&sid) {
                return Ok(ApprovalStatus::AllowSession);
            }
        }

        let ttl = ttl_ms.unwrap_or(self.config.default_ttl_ms);
        let id = self.request(tool_name, tool_input, reason, Some(ttl), session_id).await?;

        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(id, tx);

        let timeout = std::time::Duration::from_millis(ttl.max(0) as u64);
        let decision = tokio::select! {
            result = rx => result.unwrap_or(ApprovalStatus::Timeout),
            _ = tokio::time::sleep(timeout) => {
                self.waiters.write().await.remove(&id);
                if let Some(mut request) = self.repo.get(id).await? {
                    if request.status == ApprovalStatus::Pending {
                        request.expire();
                        self.repo.update(&request).await?;
                        warn!(approval_id = %id, "approval timed out while a caller was waiting");
                        self.events.emit("approval:timeout", serde_json::json!({ "approval_id": id.to_string() })).await;
                    }
                }
                ApprovalStatus::Timeout
            }
        };
        Ok(decision)
    }

    /// Open a new approval request, TTL defaulting from config when `ttl_ms`
    /// is not given.
    #[instrument(skip(self, tool_input, reason), err)]
    pub async fn request(
        &self,
        tool_name: &str,
        tool_input: serde_json::Value,
        reason: impl Into<String>,
        ttl_ms: Option<i64>,
        session_id: Option<SessionId>,
    ) -> Result<ApprovalId, OrchestraError> {
        let ttl = ttl_ms.unwrap_or(self.config.default_ttl_ms);
        let mut request = ApprovalRequest::new(tool_name, tool_input, reason, ttl);
        if let Some(sid) = session_id {
            request = request.with_session(sid);
        }
        let id = request.id;
        self.repo.create(&request).await?;
        info!(approval_id = %id, tool_name, "approval requested");
        self.events
            .emit("approval:request", serde_json::json!({ "approval_id": id.to_string(), "tool_name": tool_name }))
            .await;
        Ok(id)
    }

    /// Decide a pending request. Lazily expires it first if its TTL has
    /// already elapsed. `decision` must be one of `AllowOnce`, `AllowSession`,
    /// or `Denied` — any other value is rejected by the domain model.
    #[instrument(skip(self, decided_by), err)]
    pub async fn decide(&self, id: ApprovalId, decision: Decision, decided_by: impl Into<String>) -> Result<(), OrchestraError> {
        let mut request = self.get_or_err(id).await?;
        self.expire_if_due(&mut request).await?;
        if request.status != ApprovalStatus::Pending {
            return Err(OrchestraError::Validation(format!(
                "approval {id} is no longer pending (status: {:?})",
                request.status
            )));
        }

        request.decide(decision, decided_by).map_err(OrchestraError::Validation)?;
        self.repo.update(&request).await?;

        if decision == ApprovalStatus::AllowSession {
            if let Some(sid) = request.session_id {
                self.session_grants.write().await.insert(sid);
            }
        }

        if let Some(waiter) = self.waiters.write().await.remove(&id) {
            let _ = waiter.send(decision);
        }

        info!(approval_id = %id, decision = decision.as_str(), "approval decided");
        self.events
            .emit("approval:decision", serde_json::json!({ "approval_id": id.to_string(), "decision": decision.as_str() }))
            .await;
        Ok(())
    }

    /// Startup reconciliation: resolve as `timeout` the union of every
    /// request that is pending-but-past-its-TTL, and every pending request
    /// with no in-memory waiter (a waiter that died with the previous
    /// process) — so neither can deadlock a caller that will never return.
    #[instrument(skip(self))]
    pub async fn recover_pending(&self) -> Result<Vec<ApprovalId>, OrchestraError> {
        let expired = self.repo.get_expired(Utc::now()).await?;
        let pending = self.repo.list_pending().await?;

        let mut to_recover: HashMap<ApprovalId, ApprovalRequest> = HashMap::new();
        for request in expired {
            to_recover.insert(request.id, request);
        }
        {
            let waiters = self.waiters.read().await;
            for request in pending {
                if !waiters.contains_key(&request.id) {
                    to_recover.entry(request.id).or_insert(request);
                }
            }
        }

        let mut recovered = Vec::new();
        for (id, mut request) in to_recover {
            request.expire();
            self.repo.update(&request).await?;
            warn!(approval_id = %id, "recovered orphaned pending approval as timeout");
            self.events.emit("approval:timeout", serde_json::json!({ "approval_id": id.to_string() })).await;
            recovered.push(id);
        }
        Ok(recovered)
    }

    /// Cancel every outstanding in-process waiter (resolving with
    /// `ApprovalStatus::Timeout`) and drop them. Persisted rows are left
    /// untouched.
    pub async fn shutdown(&self) {
        let mut waiters = self.waiters.write().await;
        for (_, waiter) in waiters.drain() {
            let _ = waiter.send(ApprovalStatus::Timeout);
        }
    }

    /// Sweep every pending request and time out the ones whose TTL elapsed.
    /// Returns the ids that were timed out.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<Vec<ApprovalId>, OrchestraError> {
        let pending = self.repo.list_pending().await?;
        let mut expired = Vec::new();
        for mut request in pending {
            if request.is_expired(Utc::now()) {
                let id = request.id;
                request.expire();
                self.repo.update(&request).await?;
                warn!(approval_id = %id, "approval timed out without a decision");
                self.events.emit("approval:timeout", serde_json::json!({ "approval_id": id.to_string() })).await;
                expired.push(id);
            }
        }
        Ok(expired)
    }

    pub async fn list_pending(&self) -> Result<Vec<ApprovalRequest>, OrchestraError> {
        Ok(self.repo.list_pending().await?)
    }

    async fn expire_if_due(&self, request: &mut ApprovalRequest) -> Result<(), OrchestraError> {
        if request.status == ApprovalStatus::Pending && request.is_expired(Utc::now()) {
            request.expire();
            self.repo.update(request).await?;
            self.events
                .emit("approval:timeout", serde_json::json!({ "approval_id": request.id.to_string() }))
                .await;
        }
        Ok(())
    }

    async fn get_or_err(&self, id: ApprovalId) -> Result<ApprovalRequest, OrchestraError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| OrchestraError::Validation(format!("approval {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database::SqliteStore;

    async fn harness(ttl_ms: i64) -> (ApprovalManager, SqliteStore) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let manager = ApprovalManager::new(
            Arc::new(store.approvals.clone()),
            Arc::new(EventBus::new()),
            ApprovalConfig { default_ttl_ms: ttl_ms, auto_deny_on_expiry: true },
        );
        (manager, store)
    }

    #[tokio::test]
    async fn approving_a_pending_request_succeeds() {
        let (manager, _store) = harness(300_000).await;
        let id = manager
            .request("bash", serde_json::json!({"command": "ls"}), "operator review", None, None)
            .await
            .unwrap();
        manager.decide(id, ApprovalStatus::AllowOnce, "alice").await.unwrap();

        let pending = manager.list_pending().await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn deciding_twice_fails_the_second_time() {
        let (manager, _store) = harness(300_000).await;
        let id = manager.request("bash", serde_json::json!({}), "review", None, None).await.unwrap();
        manager.decide(id, ApprovalStatus::AllowOnce, "alice").await.unwrap();
        let result = manager.decide(id, ApprovalStatus::Denied, "bob").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn sweep_expired_marks_elapsed_requests() {
        let (manager, _store) = harness(0).await;
        let id = manager.request("bash", serde_json::json!({}), "review", Some(0), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let expired = manager.sweep_expired().await.unwrap();
        assert_eq!(expired, vec![id]);
    }

    #[tokio::test]
    async fn request_and_wait_resolves_once_decided() {
        let (manager, _store) = harness(300_000).await;
        let manager = Arc::new(manager);
        let manager_clone = manager.clone();

        let waiter = tokio::spawn(async move {
            manager_clone.request_and_wait("bash", serde_json::json!({}), "review", None, None).await.unwrap()
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let pending = manager.list_pending().await.unwrap();
        manager.decide(pending[0].id, ApprovalStatus::AllowOnce, "alice").await.unwrap();

        let decision = waiter.await.unwrap();
        assert_eq!(decision, ApprovalStatus::AllowOnce);
    }

    #[tokio::test]
    async fn request_and_wait_times_out() {
        let (manager, _store) = harness(5).await;
        let decision = manager.request_and_wait("bash", serde_json::json!({}), "review", Some(5), None).await.unwrap();
        assert_eq!(decision, ApprovalStatus::Timeout);
    }

    #[tokio::test]
    async fn shutdown_resolves_outstanding_waiters_with_timeout() {
        let (manager, _store) = harness(300_000).await;
        let manager = Arc::new(manager);
        let manager_clone = manager.clone();

        let waiter = tokio::spawn(async move {
            manager_clone.request_and_wait("bash", serde_json::json!({}), "review", None, None).await.unwrap()
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        manager.shutdown().await;

        let decision = waiter.await.unwrap();
        assert_eq!(decision, ApprovalStatus::Timeout);
    }

    #[tokio::test]
    async fn allow_session_suppresses_future_prompts_for_the_same_session() {
        let (manager, _store) = harness(300_000).await;
        let session_id = SessionId::new();

        let id = manager
            .request("bash", serde_json::json!({}), "first ask", None, Some(session_id))
            .await
            .unwrap();
        manager.decide(id, ApprovalStatus::AllowSession, "alice").await.unwrap();

        let second = manager
            .request_and_wait("bash", serde_json::json!({}), "second ask", None, Some(session_id))
            .await
            .unwrap();
        assert_eq!(second, ApprovalStatus::AllowSession);
        // The short-circuit must not have created a second pending row.
        assert!(manager.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn allow_once_does_not_suppress_future_prompts() {
        let (manager, _store) = harness(300_000).await;
        let session_id = SessionId::new();

        let id = manager
            .request("bash", serde_json::json!({}), "first ask", None, Some(session_id))
            .await
            .unwrap();
        manager.decide(id, ApprovalStatus::AllowOnce, "alice").await.unwrap();

        let manager = Arc::new(manager);
        let manager_clone = manager.clone();
        let waiter = tokio::spawn(async move {
            manager_clone
                .request_and_wait("bash", serde_json::json!({}), "second ask", None, Some(session_id))
                .await
                .unwrap()
        });
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let pending = manager.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        manager.decide(pending[0].id, ApprovalStatus::Denied, "bob").await.unwrap();
        assert_eq!(waiter.await.unwrap(), ApprovalStatus::Denied);
    }

    #[tokio::test]
    async fn recover_pending_times_out_requests_with_no_in_memory_waiter() {
        let (manager, _store) = harness(300_000).await;
        manager.request("bash", serde_json::json!({}), "orphaned", None, None).await.unwrap();

        let recovered = manager.recover_pending().await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert!(manager.list_pending().await.unwrap().is_empty());
    }
}
