//! BackgroundTaskRunner: a per-process owner of independent "background"
//! LLM worker loops, partitioned by chat key and bounded in concurrency.
//!
//! The actual loop implementation is injected as a [`BackgroundWorker`] so
//! this module never depends on a concrete LLM transport — only on the
//! `LlmProvider` port indirectly, through whatever the caller wires up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::models::TaskId;
use crate::infrastructure::config::BackgroundTasksConfig;
use crate::services::event_bus::EventBus;

/// Progress chunks shorter than this are emitted as-is; longer ones are
/// truncated before being published.
const PROGRESS_CHUNK_TRUNCATE: usize = 200;

/// One background worker implementation, e.g. a dialog loop bound to an
/// `LlmProvider`. `progress` is called by the worker as it streams partial
/// output; the runner throttles and truncates before publishing it.
#[async_trait]
pub trait BackgroundWorker: Send + Sync {
    async fn run(
        &self,
        description: String,
        cancel: CancellationToken,
        progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    Cancelled,
    Finished,
    Timeout,
}

struct TaskRecord {
    chat_key: String,
    state: RunState,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    last_progress_emit: Option<DateTime<Utc>>,
}

pub struct SpawnOptions {
    pub time_budget_ms: Option<u64>,
    pub failure_context: Option<String>,
    pub retry_count: u32,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self { time_budget_ms: None, failure_context: None, retry_count: 0 }
    }
}

type OnComplete = Arc<dyn Fn(TaskId, String, bool) + Send + Sync>;

pub struct BackgroundTaskRunner {
    worker: Arc<dyn BackgroundWorker>,
    events: Arc<EventBus>,
    config: BackgroundTasksConfig,
    records: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    stopping: AtomicBool,
}

impl BackgroundTaskRunner {
    pub fn new(worker: Arc<dyn BackgroundWorker>, events: Arc<EventBus>, config: BackgroundTasksConfig) -> Self {
        Self {
            worker,
            events,
            config,
            records: Arc::new(RwLock::new(HashMap::new())),
            stopping: AtomicBool::new(false),
        }
    }

    /// Rewrite `description` for a retry attempt, matching the exact prefix
    /// shape callers correlate against in channel transcripts.
    fn rewrite_for_retry(description: &str, failure_context: Option<&str>, retry_count: u32) -> String {
        match failure_context {
            Some(context) if retry_count > 0 => format!(
                "Previous attempt failed: {context}. This is attempt {}. Try a different approach.\n\n{description}",
                retry_count + 1
            ),
            _ => description.to_string(),
        }
    }

    #[instrument(skip(self, description, on_complete, opts), fields(chat_key = %chat_key), err)]
    pub async fn spawn(
        &self,
        description: impl Into<String>,
        chat_key: impl Into<String>,
        on_complete: Option<OnComplete>,
        opts: SpawnOptions,
    ) -> Result<TaskId, String> {
        let chat_key = chat_key.into();
        let description = description.into();

        let running_in_chat = {
            let records = self.records.read().await;
            records.values().filter(|r| r.chat_key == chat_key && r.state == RunState::Running).count()
        };
        if running_in_chat >= self.config.per_chat_concurrency {
            return Err(format!(
                "chat {chat_key} already has {running_in_chat} background tasks running (max {})",
                self.config.per_chat_concurrency
            ));
        }

        let description = Self::rewrite_for_retry(&description, opts.failure_context.as_deref(), opts.retry_count);
        let id = TaskId::new();
        let cancel = CancellationToken::new();

        {
            let mut records = self.records.write().await;
            records.insert(
                id,
                TaskRecord {
                    chat_key: chat_key.clone(),
                    state: RunState::Running,
                    started_at: Utc::now(),
                    cancel: cancel.clone(),
                    last_progress_emit: None,
                },
            );
        }

        info!(task_id = %id, chat_key, "background task delegated");
        self.events
            .emit("bg-task:delegated", serde_json::json!({ "task_id": id.to_string(), "chat_key": chat_key }))
            .await;

        let worker = self.worker.clone();
        let events = self.events.clone();
        let records = self.records.clone();
        let throttle_ms = self.config.progress_throttle_ms;
        let time_budget_ms = opts.time_budget_ms;
        let cleanup_delay = std::time::Duration::from_secs(60);

        let progress_events = events.clone();
        let progress_records = records.clone();
        let progress_id = id;
        let progress: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |chunk: String| {
            let progress_events = progress_events.clone();
            let progress_records = progress_records.clone();
            let chunk = if chunk.chars().count() > PROGRESS_CHUNK_TRUNCATE {
                chunk.chars().take(PROGRESS_CHUNK_TRUNCATE).collect()
            } else {
                chunk
            };
            tokio::spawn(async move {
                let should_emit = {
                    let mut records = progress_records.write().await;
                    if let Some(record) = records.get_mut(&progress_id) {
                        let now = Utc::now();
                        let due = record
                            .last_progress_emit
                            .map(|last| (now - last).num_milliseconds() as u64 >= throttle_ms)
                            .unwrap_or(true);
                        if due {
                            record.last_progress_emit = Some(now);
                        }
                        due
                    } else {
                        false
                    }
                };
                if should_emit {
                    progress_events
                        .emit("bg-task:progress", serde_json::json!({ "task_id": progress_id.to_string(), "chunk": chunk }))
                        .await;
                }
            });
        });

        tokio::spawn(async move {
            let mut timed_out = false;
            let result = match time_budget_ms {
                Some(budget_ms) => {
                    tokio::select! {
                        result = worker.run(description, cancel.clone(), progress) => result,
                        () = tokio::time::sleep(std::time::Duration::from_millis(budget_ms)) => {
                            timed_out = true;
                            cancel.cancel();
                            warn!(task_id = %id, budget_ms, "background task exceeded its time budget");
                            Err("Task exceeded its time budget".to_string())
                        }
                    }
                }
                None => worker.run(description, cancel.clone(), progress).await,
            };

            let (success, text) = if timed_out {
                (false, result.unwrap_or_else(|err| err))
            } else if cancel.is_cancelled() {
                (false, "Task cancelled".to_string())
            } else {
                match result {
                    Ok(text) => (true, text),
                    Err(err) => (false, err),
                }
            };

            let final_state = if timed_out {
                RunState::Timeout
            } else if cancel.is_cancelled() {
                RunState::Cancelled
            } else {
                RunState::Finished
            };

            {
                let mut records = records.write().await;
                if let Some(record) = records.get_mut(&id) {
                    record.state = final_state;
                }
            }

            events
                .emit(
                    "bg-task:completed",
                    serde_json::json!({
                        "task_id": id.to_string(),
                        "success": success,
                        "text": text,
                        "timed_out": timed_out,
                    }),
                )
                .await;
            if let Some(cb) = on_complete {
                cb(id, text, success);
            }

            tokio::time::sleep(cleanup_delay).await;
            records.write().await.remove(&id);
        });

        Ok(id)
    }

    /// Cancel a still-running task. Returns whether a cancellation actually
    /// occurred (`false` if the task is unknown or already finished).
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: TaskId) -> bool {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&id) {
            if record.state == RunState::Running {
                record.state = RunState::Cancelled;
                record.cancel.cancel();
                warn!(task_id = %id, "background task cancelled");
                return true;
            }
        }
        false
    }

    /// Hard-stop every tracked task and clear all bookkeeping.
    pub async fn stop_all(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let mut records = self.records.write().await;
        for record in records.values() {
            record.cancel.cancel();
        }
        records.clear();
        self.stopping.store(false, Ordering::SeqCst);
    }

    pub async fn running_count_for_chat(&self, chat_key: &str) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.chat_key == chat_key && r.state == RunState::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct EchoWorker;

    #[async_trait]
    impl BackgroundWorker for EchoWorker {
        async fn run(
            &self,
            description: String,
            cancel: CancellationToken,
            progress: Arc<dyn Fn(String) + Send + Sync>,
        ) -> Result<String, String> {
            progress("working...".to_string());
            if cancel.is_cancelled() {
                return Err("cancelled".to_string());
            }
            Ok(format!("done: {description}"))
        }
    }

    struct HangingWorker;

    #[async_trait]
    impl BackgroundWorker for HangingWorker {
        async fn run(
            &self,
            _description: String,
            cancel: CancellationToken,
            _progress: Arc<dyn Fn(String) + Send + Sync>,
        ) -> Result<String, String> {
            cancel.cancelled().await;
            Err("interrupted".to_string())
        }
    }

    fn test_config() -> BackgroundTasksConfig {
        BackgroundTasksConfig { per_chat_concurrency: 2, progress_throttle_ms: 0, collect_window_ms: 0 }
    }

    #[tokio::test]
    async fn spawn_rewrites_description_on_retry() {
        let rewritten = BackgroundTaskRunner::rewrite_for_retry("Summarize README", Some("Error: null reference"), 1);
        assert!(rewritten.starts_with("Previous attempt failed: Error: null reference. This is attempt 2."));
        assert!(rewritten.ends_with("Summarize README"));
    }

    #[tokio::test]
    async fn zero_retry_count_passes_description_through() {
        let unchanged = BackgroundTaskRunner::rewrite_for_retry("Summarize README", Some("whatever"), 0);
        assert_eq!(unchanged, "Summarize README");
    }

    #[tokio::test]
    async fn spawn_beyond_per_chat_limit_errors() {
        let runner = BackgroundTaskRunner::new(Arc::new(HangingWorker), Arc::new(EventBus::new()), test_config());
        runner.spawn("a", "chat-1", None, SpawnOptions::default()).await.unwrap();
        runner.spawn("b", "chat-1", None, SpawnOptions::default()).await.unwrap();
        let result = runner.spawn("c", "chat-1", None, SpawnOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn completed_task_invokes_on_complete_with_success() {
        let runner = BackgroundTaskRunner::new(Arc::new(EchoWorker), Arc::new(EventBus::new()), test_config());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let on_complete: OnComplete = Arc::new(move |_id, _text, success| {
            if success {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        runner.spawn("task", "chat-1", Some(on_complete), SpawnOptions::default()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_returns_false_for_unknown_task() {
        let runner = BackgroundTaskRunner::new(Arc::new(EchoWorker), Arc::new(EventBus::new()), test_config());
        assert!(!runner.cancel(TaskId::new()).await);
    }

    #[tokio::test]
    async fn a_task_that_outlives_its_time_budget_is_reported_as_timed_out() {
        let runner = BackgroundTaskRunner::new(Arc::new(HangingWorker), Arc::new(EventBus::new()), test_config());
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let on_complete: OnComplete = Arc::new(move |_id, text, success| {
            if !success && text == "Task exceeded its time budget" {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });
        let opts = SpawnOptions { time_budget_ms: Some(10), failure_context: None, retry_count: 0 };
        runner.spawn("slow", "chat-1", Some(on_complete), opts).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
