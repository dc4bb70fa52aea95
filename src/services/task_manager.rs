//! TaskManager: owns the task dependency graph and its state machine.
//!
//! A bare [`Task`] only knows its own fields; `TaskManager` is responsible
//! for keeping `blocked_by`/`blocks` symmetric across the whole graph and
//! for enforcing the legal status transitions (claim, complete, fail,
//! retry, block/unblock). `fail` and `retry` are distinct, caller-invoked
//! operations: `fail` always marks a task `Failed`; callers that want to
//! retry (e.g. `TaskVerifier`, gated on its own `max_retries`) call
//! `retry` explicitly afterward.

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::domain::errors::OrchestraError;
use crate::domain::models::{Task, TaskId, TaskStatus};
use crate::domain::ports::TaskRepository;
use crate::services::event_bus::EventBus;

pub struct TaskManager {
    repo: Arc<dyn TaskRepository>,
    events: Arc<EventBus>,
}

impl TaskManager {
    pub fn new(repo: Arc<dyn TaskRepository>, events: Arc<EventBus>) -> Self {
        Self { repo, events }
    }

    /// Insert a task, then wire `blocked_by`/`blocks` symmetrically with
    /// each named dependency. Fails if a named dependency does not exist
    /// or introduces a cycle.
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    pub async fn submit(&self, mut task: Task) -> Result<TaskId, OrchestraError> {
        let dep_ids: Vec<TaskId> = task.blocked_by.iter().copied().collect();
        for dep_id in &dep_ids {
            let Some(_) = self.repo.get(*dep_id).await? else {
                return Err(OrchestraError::Dependency(format!("dependency {dep_id} does not exist")));
            };
        }

        if self.would_cycle(task.id, &dep_ids).await? {
            return Err(OrchestraError::Dependency(format!("task {} would create a dependency cycle", task.id)));
        }

        let newly_blocked = !dep_ids.is_empty();
        if newly_blocked {
            task.status = TaskStatus::Blocked;
        }

        self.repo.create(&task).await?;

        for dep_id in &dep_ids {
            if let Some(mut dep) = self.repo.get(*dep_id).await? {
                dep.blocks.insert(task.id);
                dep.touch();
                self.repo.update(&dep).await?;
            }
        }

        info!(task_id = %task.id, "task submitted");
        self.events.emit("task:created", serde_json::json!({ "task_id": task.id.to_string() })).await;
        if newly_blocked {
            self.events.emit("task:blocked", serde_json::json!({ "task_id": task.id.to_string() })).await;
        }
        Ok(task.id)
    }

    async fn would_cycle(&self, new_id: TaskId, deps: &[TaskId]) -> Result<bool, OrchestraError> {
        let mut stack = deps.to_vec();
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if id == new_id {
                return Ok(true);
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = self.repo.get(id).await? {
                stack.extend(task.blocked_by.iter().copied());
            }
        }
        Ok(false)
    }

    /// Move a task from `Pending` to `InProgress` under the given owner.
    #[instrument(skip(self), err)]
    pub async fn claim(&self, id: TaskId, owner: &str) -> Result<(), OrchestraError> {
        let mut task = self.get_or_err(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(OrchestraError::Concurrency(format!(
                "task {id} cannot be claimed from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::InProgress;
        task.owner = Some(owner.to_string());
        task.touch();
        self.repo.update(&task).await?;
        self.events
            .emit("task:updated", serde_json::json!({ "task_id": id.to_string(), "changed": ["status", "owner"] }))
            .await;
        Ok(())
    }

    /// Mark a task complete, unblocking every task that only depended on it.
    #[instrument(skip(self), err)]
    pub async fn complete(&self, id: TaskId) -> Result<Vec<TaskId>, OrchestraError> {
        let mut task = self.get_or_err(id).await?;
        if task.status != TaskStatus::InProgress {
            return Err(OrchestraError::Concurrency(format!(
                "task {id} cannot be completed from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Completed;
        task.touch();
        self.repo.update(&task).await?;

        let mut unblocked = Vec::new();
        for dependent_id in task.blocks.clone() {
            if let Some(mut dependent) = self.repo.get(dependent_id).await? {
                dependent.blocked_by.remove(&id);
                if dependent.blocked_by.is_empty() && dependent.status == TaskStatus::Blocked {
                    dependent.status = TaskStatus::Pending;
                    unblocked.push(dependent_id);
                }
                dependent.touch();
                self.repo.update(&dependent).await?;
            }
        }

        self.events.emit("task:completed", serde_json::json!({ "task_id": id.to_string() })).await;
        for unblocked_id in &unblocked {
            info!(task_id = %unblocked_id, "task unblocked");
            self.events
                .emit("task:updated", serde_json::json!({ "task_id": unblocked_id.to_string(), "changed": ["blockedBy", "status"] }))
                .await;
        }
        Ok(unblocked)
    }

    /// Record a failure: sets `status = Failed`, stores `failure_context`
    /// (truncated by [`Task::set_failure_context`]), and increments
    /// `retry_count`. Does not itself move the task back to `Pending` —
    /// callers that want to retry call [`Self::retry`] explicitly. Returns
    /// the updated `retry_count` so a caller like `TaskVerifier` can gate a
    /// retry decision against its own cap.
    #[instrument(skip(self, context), err)]
    pub async fn fail(&self, id: TaskId, context: impl Into<String>) -> Result<u32, OrchestraError> {
        let mut task = self.get_or_err(id).await?;
        task.set_failure_context(context);
        task.retry_count += 1;
        task.status = TaskStatus::Failed;
        task.touch();
        self.repo.update(&task).await?;
        warn!(task_id = %id, retry_count = task.retry_count, "task failed");
        self.events
            .emit("task:updated", serde_json::json!({ "task_id": id.to_string(), "changed": ["status", "failureContext", "retryCount"] }))
            .await;
        Ok(task.retry_count)
    }

    /// Move a task back to `Pending` for another attempt. Only legal from
    /// `Failed`. Clears the owner; preserves `failure_context` and
    /// `retry_count` so the next attempt can use them to alter strategy.
    #[instrument(skip(self), err)]
    pub async fn retry(&self, id: TaskId) -> Result<(), OrchestraError> {
        let mut task = self.get_or_err(id).await?;
        if task.status != TaskStatus::Failed {
            return Err(OrchestraError::Concurrency(format!(
                "task {id} cannot be retried from status {:?}",
                task.status
            )));
        }
        task.status = TaskStatus::Pending;
        task.owner = None;
        task.touch();
        self.repo.update(&task).await?;
        info!(task_id = %id, retry_count = task.retry_count, "task retried");
        self.events
            .emit("task:updated", serde_json::json!({ "task_id": id.to_string(), "changed": ["status", "owner"] }))
            .await;
        Ok(())
    }

    pub async fn list_ready(&self) -> Result<Vec<Task>, OrchestraError> {
        Ok(self.repo.list_ready().await?)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>, OrchestraError> {
        Ok(self.repo.get(id).await?)
    }

    async fn get_or_err(&self, id: TaskId) -> Result<Task, OrchestraError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| OrchestraError::Validation(format!("task {id} not found")))
    }
}
