//! TaskVerifier: shells out to a task's user-supplied verification command
//! on completion, re-opening the task for retry when it fails.

use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::domain::errors::OrchestraError;
use crate::domain::models::TaskId;
use crate::services::event_bus::EventBus;
use crate::services::task_manager::TaskManager;

/// Captured stdout/stderr longer than this is truncated before logging or
/// being attached to the task's failure context.
const OUTPUT_TRUNCATE_LEN: usize = 2000;

/// Exit code reported when the verification command itself times out.
const TIMEOUT_EXIT_CODE: i32 = 124;

pub struct TaskVerifier {
    task_manager: Arc<TaskManager>,
    events: Arc<EventBus>,
    verify_timeout_ms: u64,
    max_retries: u32,
}

impl TaskVerifier {
    pub fn new(task_manager: Arc<TaskManager>, events: Arc<EventBus>, verify_timeout_ms: u64, max_retries: u32) -> Self {
        Self { task_manager, events, verify_timeout_ms, max_retries }
    }

    /// Run `verify_command` (if any) for a just-completed task and react to
    /// the result. A task with no `verify_command` is a no-op.
    #[instrument(skip(self, verify_command), err)]
    pub async fn verify(
        &self,
        task_id: TaskId,
        subject: &str,
        verify_command: Option<&str>,
        attempt: u32,
    ) -> Result<bool, OrchestraError> {
        let Some(command) = verify_command.filter(|c| !c.trim().is_empty()) else {
            return Ok(true);
        };

        let (exit_code, output) = self.run_command(command).await;

        if exit_code == 0 {
            info!(task_id = %task_id, "verification passed");
            self.events
                .emit("task:verification_passed", serde_json::json!({ "task_id": task_id.to_string() }))
                .await;
            return Ok(true);
        }

        warn!(task_id = %task_id, exit_code, "verification failed");
        self.events
            .emit(
                "task:verification_failed",
                serde_json::json!({
                    "task_id": task_id.to_string(),
                    "subject": subject,
                    "attempt": attempt,
                    "output": output,
                }),
            )
            .await;

        let retry_count = self.task_manager.fail(task_id, format!("Verification failed: {output}")).await?;
        if retry_count < self.max_retries {
            self.task_manager.retry(task_id).await?;
        } else {
            warn!(task_id = %task_id, retry_count, max_retries = self.max_retries, "verification failed, retry cap reached, leaving task failed");
        }
        Ok(false)
    }

    async fn run_command(&self, command: &str) -> (i32, String) {
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return (TIMEOUT_EXIT_CODE, "empty verify command".to_string());
        };
        let args: Vec<&str> = parts.collect();

        let child = Command::new(program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let timeout = std::time::Duration::from_millis(self.verify_timeout_ms);
        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                (output.status.code().unwrap_or(-1), Self::truncate(&combined))
            }
            Ok(Err(err)) => (-1, Self::truncate(&err.to_string())),
            Err(_) => (TIMEOUT_EXIT_CODE, "timed out".to_string()),
        }
    }

    fn truncate(s: &str) -> String {
        if s.chars().count() > OUTPUT_TRUNCATE_LEN {
            s.chars().take(OUTPUT_TRUNCATE_LEN).collect()
        } else {
            s.to_string()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Task;
    use crate::infrastructure::database::SqliteStore;

    async fn harness() -> (TaskVerifier, Arc<TaskManager>) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let events = Arc::new(EventBus::new());
        let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
        let verifier = TaskVerifier::new(task_manager.clone(), events, 5000, 3);
        (verifier, task_manager)
    }

    #[tokio::test]
    async fn no_verify_command_is_a_no_op() {
        let (verifier, _tm) = harness().await;
        let passed = verifier.verify(TaskId::new(), "subject", None, 1).await.unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn passing_command_returns_true() {
        let (verifier, _tm) = harness().await;
        let passed = verifier.verify(TaskId::new(), "subject", Some("true"), 1).await.unwrap();
        assert!(passed);
    }

    #[tokio::test]
    async fn failing_command_fails_the_task() {
        let (verifier, task_manager) = harness().await;
        let task = Task::new("check build", "verify build output");
        let id = task_manager.submit(task).await.unwrap();
        task_manager.claim(id, "bot").await.unwrap();

        let passed = verifier.verify(id, "check build", Some("false"), 1).await.unwrap();
        assert!(!passed);
    }

    #[tokio::test]
    async fn failing_command_reopens_the_task_when_under_the_retry_cap() {
        let (verifier, task_manager) = harness().await;
        let task = Task::new("check build", "verify build output");
        let id = task_manager.submit(task).await.unwrap();
        task_manager.claim(id, "bot").await.unwrap();

        verifier.verify(id, "check build", Some("false"), 1).await.unwrap();

        let fetched = task_manager.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, crate::domain::models::TaskStatus::Pending);
        assert_eq!(fetched.retry_count, 1);
    }

    #[tokio::test]
    async fn failing_command_leaves_the_task_failed_once_the_retry_cap_is_reached() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let events = Arc::new(EventBus::new());
        let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
        // A cap of 1 means the first failure (retry_count -> 1) already meets
        // the cap, so the task must stay `Failed` rather than being reopened.
        let verifier = TaskVerifier::new(task_manager.clone(), events, 5000, 1);

        let task = Task::new("check build", "verify build output");
        let id = task_manager.submit(task).await.unwrap();
        task_manager.claim(id, "bot").await.unwrap();

        let passed = verifier.verify(id, "check build", Some("false"), 1).await.unwrap();
        assert!(!passed);

        let fetched = task_manager.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.status, crate::domain::models::TaskStatus::Failed);
        assert_eq!(fetched.retry_count, 1);
    }
}
