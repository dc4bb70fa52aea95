//! ChatSession: per-chat serialized dialog processor.
//!
//! Owns one dialog LLM loop (a fixed system prompt plus three tools —
//! `delegate_task`, `list_tasks`, `cancel_task`), its own `MessageQueue`,
//! and an optional complexity gate that hands a turn off to a fresh swarm
//! run instead of the dialog loop. The session never references a concrete
//! `SwarmCoordinator` type directly — a `SwarmRunner` is injected so the
//! dialog/swarm cyclic dependency never materializes as a compile-time
//! cycle (ChatSession -> swarm -> AgentRegistry -> dialog machinery).

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::models::{Priority, QueueMode, QueuedMessage, SessionId};
use crate::domain::ports::llm_provider::{ChatEvent, ChatParameters, ChatRequest, ChatTurn};
use crate::domain::ports::LlmProvider;
use crate::domain::models::{MessageContent, Role};
use crate::services::background_task_runner::{BackgroundTaskRunner, SpawnOptions};
use crate::services::event_bus::EventBus;
use crate::services::message_queue::{EnqueueOutcome, MessageQueue};
use crate::services::task_manager::TaskManager;

const SWARM_RESULT_TRUNCATE_CHARS: usize = 4000;
const MAX_TOOL_LOOP_ITERATIONS: u32 = 8;

const DIALOG_SYSTEM_PROMPT: &str = "You are the dialog responder for a chat session. \
Answer directly when you can. Use delegate_task for anything that takes real work, \
list_tasks to check on work in flight, and cancel_task to stop a background task.";

/// Complexity classification gate: decides whether a turn should be routed
/// to a fresh swarm run instead of the lightweight dialog loop.
#[async_trait]
pub trait ComplexityClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Complexity;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

/// Runs a goal through a fresh swarm and returns its rendered output.
/// Implemented by an adapter over `SwarmCoordinator` so this module never
/// names that type directly.
#[async_trait]
pub trait SwarmRunner: Send + Sync {
    async fn run_swarm(&self, goal: &str) -> Result<String, String>;
}

pub struct ChatSessionDeps {
    pub complexity_classifier: Option<Arc<dyn ComplexityClassifier>>,
    pub swarm_runner: Option<Arc<dyn SwarmRunner>>,
}

impl Default for ChatSessionDeps {
    fn default() -> Self {
        Self { complexity_classifier: None, swarm_runner: None }
    }
}

pub struct ChatSession {
    session_id: SessionId,
    chat_key: String,
    llm: Arc<dyn LlmProvider>,
    task_manager: Arc<TaskManager>,
    background_runner: Arc<BackgroundTaskRunner>,
    events: Arc<EventBus>,
    queue: MessageQueue,
    deps: ChatSessionDeps,
    history: RwLock<Vec<ChatTurn>>,
    active_swarm: Mutex<Option<CancellationToken>>,
    dialog_interrupt: RwLock<CancellationToken>,
    bg_completion_handler: RwLock<Option<crate::services::event_bus::HandlerId>>,
    collect_window_ms: u64,
    collect_idle_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    reply_sink: RwLock<Option<Arc<dyn Fn(String) + Send + Sync>>>,
}

impl ChatSession {
    pub fn new(
        chat_key: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        task_manager: Arc<TaskManager>,
        background_runner: Arc<BackgroundTaskRunner>,
        events: Arc<EventBus>,
        deps: ChatSessionDeps,
        collect_window_ms: u64,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            chat_key: chat_key.into(),
            llm,
            task_manager,
            background_runner,
            events,
            queue: MessageQueue::new(),
            deps,
            history: RwLock::new(Vec::new()),
            active_swarm: Mutex::new(None),
            dialog_interrupt: RwLock::new(CancellationToken::new()),
            bg_completion_handler: RwLock::new(None),
            collect_window_ms,
            collect_idle_handle: Mutex::new(None),
            reply_sink: RwLock::new(None),
        }
    }

    /// Register where auto-flushed collect-mode replies (ones with no
    /// synchronous caller to hand them back to) should be delivered.
    pub async fn set_reply_sink(&self, sink: Arc<dyn Fn(String) + Send + Sync>) {
        *self.reply_sink.write().await = Some(sink);
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Subscribe to `bg-task:completed`, filtering by this session's chat
    /// key, and return the rendered reply via `on_reply`. Idempotent: a
    /// second call replaces the first subscription.
    pub async fn subscribe_background_completions(self: &Arc<Self>, on_reply: Arc<dyn Fn(String) + Send + Sync>) {
        let chat_key = self.chat_key.clone();
        let events = self.events.clone();
        let handler_id = events
            .on("bg-task:completed", move |payload| {
                let chat_key = chat_key.clone();
                let on_reply = on_reply.clone();
                async move {
                    let Some(event_chat_key) = payload.get("chat_key").and_then(|v| v.as_str()) else {
                        return;
                    };
                    if event_chat_key != chat_key {
                        return;
                    }
                    let success = payload.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
                    let text = payload.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                    let prefix = if success { "Task completed:" } else { "Task failed:" };
                    on_reply(format!("{prefix} {text}"));
                }
            })
            .await;
        *self.bg_completion_handler.write().await = Some(handler_id);
    }

    /// Submit one inbound message per the session's queueing mode, dispatch
    /// it through the dialog/swarm gate, and return the reply text.
    #[instrument(skip(self, text), fields(chat_key = %self.chat_key))]
    pub async fn handle_message(self: &Arc<Self>, mode: QueueMode, text: impl Into<String>) -> Option<String> {
        let msg = QueuedMessage::new(self.session_id, self.chat_key.clone(), text).with_priority(Priority::Normal);
        match self.queue.enqueue(mode, msg).await {
            EnqueueOutcome::Deliver(text) => {
                self.queue.mark_busy(self.session_id).await;
                let reply = self.process_turn(&text).await;
                self.queue.mark_idle(self.session_id).await;
                self.drain_queued().await;
                Some(reply)
            }
            EnqueueOutcome::Interrupt(text) => {
                self.trigger_interrupt().await;
                self.queue.mark_busy(self.session_id).await;
                let reply = self.process_turn(&text).await;
                self.queue.mark_idle(self.session_id).await;
                self.drain_queued().await;
                Some(reply)
            }
            EnqueueOutcome::Queued => None,
            EnqueueOutcome::Buffered => {
                self.schedule_collect_flush().await;
                None
            }
        }
    }

    /// Cancel whatever dialog turn is in flight and arm a fresh token for
    /// the turn about to replace it.
    async fn trigger_interrupt(&self) {
        let mut guard = self.dialog_interrupt.write().await;
        guard.cancel();
        *guard = CancellationToken::new();
    }

    /// (Re)start the idle timer backing collect-mode auto-flush: each new
    /// buffered message pushes the deadline back by `collect_window_ms`,
    /// so the batch only flushes once input has gone quiet.
    async fn schedule_collect_flush(self: &Arc<Self>) {
        let mut guard = self.collect_idle_handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
        let this = self.clone();
        let window = self.collect_window_ms;
        *guard = Some(tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(window)).await;
            if let Some(reply) = this.flush_collect_window().await {
                if let Some(sink) = this.reply_sink.read().await.clone() {
                    sink(reply);
                }
            }
        }));
    }

    /// Drain and run the collect buffer as one combined turn, if anything
    /// accumulated.
    pub async fn flush_collect_window(&self) -> Option<String> {
        let batch = self.queue.drain_collect_batch(self.session_id).await?;
        let combined = batch.into_iter().map(|m| m.text).collect::<Vec<_>>().join("\n");
        self.queue.mark_busy(self.session_id).await;
        let reply = self.process_turn(&combined).await;
        self.queue.mark_idle(self.session_id).await;
        Some(reply)
    }

    async fn drain_queued(&self) {
        while let Some(next) = self.queue.drain_next(self.session_id).await {
            self.queue.mark_busy(self.session_id).await;
            let _ = self.process_turn(&next.text).await;
            self.queue.mark_idle(self.session_id).await;
        }
    }

    /// Consult the complexity gate; route to swarm or the dialog loop.
    async fn process_turn(&self, text: &str) -> String {
        if let (Some(classifier), Some(runner)) = (&self.deps.complexity_classifier, &self.deps.swarm_runner) {
            if classifier.classify(text).await == Complexity::Complex {
                return self.run_via_swarm(runner.as_ref(), text).await;
            }
        }
        self.run_dialog_turn(text).await
    }

    async fn run_via_swarm(&self, runner: &dyn SwarmRunner, text: &str) -> String {
        let cancel = CancellationToken::new();
        *self.active_swarm.lock().await = Some(cancel.clone());
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("swarm stopped".to_string()),
            outcome = runner.run_swarm(text) => outcome,
        };
        *self.active_swarm.lock().await = None;

        match result {
            Ok(output) => truncate_chars(&output, SWARM_RESULT_TRUNCATE_CHARS),
            Err(err) => format!("Swarm run failed: {err}"),
        }
    }

    /// Drive the dialog loop: stream a chat completion, execute any tool
    /// calls it emits, and feed results back until the model stops issuing
    /// tool calls or the iteration cap is hit.
    async fn run_dialog_turn(&self, text: &str) -> String {
        let interrupt = self.dialog_interrupt.read().await.clone();
        let mut history = self.history.write().await;
        history.push(ChatTurn { role: Role::User, content: MessageContent::Text(text.to_string()) });

        let mut final_text = String::new();
        for _ in 0..MAX_TOOL_LOOP_ITERATIONS {
            if interrupt.is_cancelled() {
                final_text = "Dialog turn interrupted.".to_string();
                break;
            }

            let request = ChatRequest {
                model: self.llm.get_default_model(),
                system_prompt: Some(DIALOG_SYSTEM_PROMPT.to_string()),
                turns: history.clone(),
                parameters: ChatParameters::default(),
            };

            let (text_out, tool_uses) = match self.collect_turn(request).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(error = %err, "dialog turn failed against the LLM provider");
                    final_text = format!("Sorry, something went wrong: {err}");
                    break;
                }
            };

            if tool_uses.is_empty() {
                final_text = text_out;
                history.push(ChatTurn { role: Role::Assistant, content: MessageContent::Text(final_text.clone()) });
                break;
            }

            history.push(ChatTurn { role: Role::Assistant, content: MessageContent::Text(text_out) });

            for (tool_name, tool_input) in tool_uses {
                let result = self.execute_dialog_tool(&tool_name, tool_input).await;
                history.push(ChatTurn { role: Role::Tool, content: MessageContent::Text(result) });
            }
        }

        if final_text.is_empty() {
            final_text = "I wasn't able to finish that within the allotted tool-call budget.".to_string();
        }
        final_text
    }

    async fn collect_turn(&self, request: ChatRequest) -> Result<(String, Vec<(String, serde_json::Value)>), String> {
        let mut stream = self.llm.chat(request).await.map_err(|e| e.to_string())?;
        let mut text = String::new();
        let mut tool_uses = Vec::new();
        while let Some(event) = stream.next().await {
            match event {
                ChatEvent::TextDelta(delta) => text.push_str(&delta),
                ChatEvent::ContentBlock(crate::domain::models::ContentBlock::ToolUse { name, input, .. }) => {
                    tool_uses.push((name, input));
                }
                ChatEvent::ContentBlock(_) => {}
                ChatEvent::Usage { .. } => {}
                ChatEvent::Done { .. } => break,
            }
        }
        Ok((text, tool_uses))
    }

    async fn execute_dialog_tool(&self, tool_name: &str, input: serde_json::Value) -> String {
        match tool_name {
            "delegate_task" => {
                let description = input.get("description").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                match self
                    .background_runner
                    .spawn(description, self.chat_key.clone(), None, SpawnOptions::default())
                    .await
                {
                    Ok(id) => format!("Delegated as background task {id}."),
                    Err(err) => format!("Could not delegate: {err}"),
                }
            }
            "list_tasks" => match self.task_manager.list_ready().await {
                Ok(tasks) => {
                    if tasks.is_empty() {
                        "No tasks are ready to run.".to_string()
                    } else {
                        tasks.iter().map(|t| format!("- {} ({})", t.subject, t.id)).collect::<Vec<_>>().join("\n")
                    }
                }
                Err(err) => format!("Could not list tasks: {err}"),
            },
            "cancel_task" => {
                let Some(id_str) = input.get("task_id").and_then(|v| v.as_str()) else {
                    return "cancel_task requires a task_id".to_string();
                };
                match crate::domain::models::TaskId::parse(id_str) {
                    Ok(id) => {
                        let cancelled = self.background_runner.cancel(id).await;
                        format!("cancel requested: {cancelled}")
                    }
                    Err(_) => format!("invalid task id: {id_str}"),
                }
            }
            other => format!("unknown dialog tool: {other}"),
        }
    }

    /// Cancel the queue, interrupt the dialog loop, and stop any active
    /// swarm run.
    pub async fn stop(&self) {
        self.dialog_interrupt.read().await.cancel();
        if let Some(cancel) = self.active_swarm.lock().await.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.collect_idle_handle.lock().await.take() {
            handle.abort();
        }
        if let Some(handler_id) = self.bg_completion_handler.write().await.take() {
            self.events.off("bg-task:completed", handler_id).await;
        }
        info!(chat_key = %self.chat_key, "chat session stopped");
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::UpstreamError;
    use crate::domain::ports::llm_provider::ModelInfo;
    use crate::infrastructure::config::BackgroundTasksConfig;
    use crate::infrastructure::database::SqliteStore;
    use crate::services::background_task_runner::BackgroundWorker;
    use futures::stream::BoxStream;

    struct EchoLlm;

    #[async_trait]
    impl LlmProvider for EchoLlm {
        fn provider_id(&self) -> &str {
            "echo"
        }
        async fn initialize(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
        async fn is_ready(&self) -> bool {
            true
        }
        async fn verify_credentials(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
        async fn list_models(&self) -> Result<Vec<ModelInfo>, UpstreamError> {
            Ok(vec![])
        }
        fn get_default_model(&self) -> String {
            "echo-model".to_string()
        }
        async fn chat(&self, _request: ChatRequest) -> Result<BoxStream<'static, ChatEvent>, UpstreamError> {
            let events = vec![
                ChatEvent::TextDelta("Hi there".to_string()),
                ChatEvent::Done { stop_reason: crate::domain::ports::llm_provider::StopReason::EndTurn },
            ];
            Ok(futures::stream::iter(events).boxed())
        }
        async fn compaction_chat(&self, _request: ChatRequest) -> Result<String, UpstreamError> {
            Ok(String::new())
        }
        async fn shutdown(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    struct NoopBackgroundWorker;

    #[async_trait]
    impl BackgroundWorker for NoopBackgroundWorker {
        async fn run(
            &self,
            description: String,
            _cancel: CancellationToken,
            _progress: Arc<dyn Fn(String) + Send + Sync>,
        ) -> Result<String, String> {
            Ok(description)
        }
    }

    async fn harness() -> Arc<ChatSession> {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let events = Arc::new(EventBus::new());
        let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
        let background_runner = Arc::new(BackgroundTaskRunner::new(
            Arc::new(NoopBackgroundWorker),
            events.clone(),
            BackgroundTasksConfig { per_chat_concurrency: 2, progress_throttle_ms: 0, collect_window_ms: 50 },
        ));
        Arc::new(ChatSession::new(
            "chat-1",
            Arc::new(EchoLlm),
            task_manager,
            background_runner,
            events,
            ChatSessionDeps::default(),
            50,
        ))
    }

    #[tokio::test]
    async fn a_simple_message_yields_the_llms_direct_reply() {
        let session = harness().await;
        let reply = session.handle_message(QueueMode::Queue, "Hello").await;
        assert_eq!(reply, Some("Hi there".to_string()));
    }

    #[tokio::test]
    async fn stop_cancels_the_dialog_interrupt_token() {
        let session = harness().await;
        session.stop().await;
        assert!(session.dialog_interrupt.read().await.is_cancelled());
    }

    #[tokio::test]
    async fn interrupt_mode_cancels_an_in_flight_turn_before_delivering_the_new_one() {
        let session = harness().await;
        session.queue.mark_busy(session.session_id).await;
        let interrupted = session.dialog_interrupt.read().await.clone();

        let reply = session.handle_message(QueueMode::Interrupt, "take over now").await;

        assert_eq!(reply, Some("Hi there".to_string()));
        assert!(interrupted.is_cancelled());
        assert!(!session.dialog_interrupt.read().await.is_cancelled());
    }

    #[tokio::test]
    async fn collect_mode_auto_flushes_after_the_idle_window() {
        let session = harness().await;
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        session
            .set_reply_sink(Arc::new(move |reply: String| {
                received_clone.try_lock().unwrap().push(reply);
            }))
            .await;

        assert_eq!(session.handle_message(QueueMode::Collect, "part one").await, None);
        assert_eq!(session.handle_message(QueueMode::Collect, "part two").await, None);

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(received.lock().await.len(), 1);
    }

    #[test]
    fn truncate_chars_caps_at_the_requested_length() {
        let long = "x".repeat(50);
        assert_eq!(truncate_chars(&long, 10).chars().count(), 10);
    }
}
