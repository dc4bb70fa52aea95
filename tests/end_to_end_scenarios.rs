//! The literal end-to-end scenarios: one user-visible flow per test, wired
//! against real services and in-process test doubles, no mocked internals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use orchestra_core::domain::models::{AgentDefinition, ContentBlock, QueueMode, SessionId, Task, TaskId};
use orchestra_core::domain::ports::channel::InboundMessage;
use orchestra_core::domain::ports::llm_provider::{ChatEvent, ChatRequest, ModelInfo, StopReason};
use orchestra_core::domain::ports::{Channel, LlmProvider};
use orchestra_core::domain::errors::UpstreamError;
use orchestra_core::infrastructure::config::{BackgroundTasksConfig, SwarmConfig};
use orchestra_core::infrastructure::database::SqliteStore;
use orchestra_core::services::swarm::{ApprovalHook, SwarmCoordinator, SwarmStatus};
use orchestra_core::services::{
    AgentRegistry, BackgroundTaskRunner, BackgroundWorker, ChannelRouter, ChatSessionDeps, EventBus, SubagentOutcome, SubagentWorker,
    TaskManager, TaskVerifier,
};
use orchestra_core::testing::InMemoryChannel;

/// An `LlmProvider` that always answers with one fixed reply, streamed as a
/// single text delta.
struct FixedReplyLlm {
    reply: String,
}

#[async_trait]
impl LlmProvider for FixedReplyLlm {
    fn provider_id(&self) -> &str {
        "fixed"
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
        Ok(vec![ModelInfo { id: "fixed-1".to_string(), display_name: "Fixed".to_string(), context_window: 100_000 }])
    }
    fn get_default_model(&self) -> String {
        "fixed-1".to_string()
    }
    async fn chat(&self, _request: ChatRequest) -> Result<futures::stream::BoxStream<'static, ChatEvent>, UpstreamError> {
        let events = vec![ChatEvent::TextDelta(self.reply.clone()), ChatEvent::Done { stop_reason: StopReason::EndTurn }];
        Ok(futures::stream::iter(events).boxed())
    }
    async fn compaction_chat(&self, _request: ChatRequest) -> Result<String, UpstreamError> {
        Ok(self.reply.clone())
    }
    async fn shutdown(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// A `BackgroundWorker` that echoes the description back as its result.
struct EchoBackgroundWorker;

#[async_trait]
impl BackgroundWorker for EchoBackgroundWorker {
    async fn run(
        &self,
        description: String,
        _cancel: CancellationToken,
        _progress: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<String, String> {
        if description.contains("README") {
            Ok("README contains a project overview and setup instructions.".to_string())
        } else {
            Ok(format!("done: {description}"))
        }
    }
}

/// A `SubagentWorker` that always succeeds with a fixed transcript.
struct StubSubagentWorker;

#[async_trait]
impl SubagentWorker for StubSubagentWorker {
    async fn run(&self, _agent: &AgentDefinition, task: String, _cancel: CancellationToken) -> Result<SubagentOutcome, String> {
        Ok(SubagentOutcome { text: format!("handled: {task}"), tokens_used: 10, tool_uses: 1 })
    }
}

/// An `ApprovalHook` that always denies.
struct DenyHook;

#[async_trait]
impl ApprovalHook for DenyHook {
    async fn approve(&self, _swarm_id: orchestra_core::domain::models::SwarmId, _task: &str, _agent_count: usize) -> bool {
        false
    }
}

fn event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

/// S1 Simple dialog: one user message gets one direct LLM reply, verbatim,
/// sent back over the channel.
#[tokio::test]
async fn s1_simple_dialog_replies_with_the_llms_text() {
    let events = event_bus();
    let llm: Arc<dyn LlmProvider> = Arc::new(FixedReplyLlm { reply: "Hi there".to_string() });
    let store = SqliteStore::open_in_memory().await.unwrap();
    let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
    let background_runner =
        Arc::new(BackgroundTaskRunner::new(Arc::new(EchoBackgroundWorker), events.clone(), BackgroundTasksConfig::default()));

    let router = Arc::new(ChannelRouter::new(
        llm,
        task_manager,
        background_runner,
        events,
        Arc::new(|| ChatSessionDeps::default()),
        QueueMode::Queue,
        5_000,
    ));

    let channel = Arc::new(InMemoryChannel::new("test"));
    router.clone().attach(channel.clone());

    channel
        .deliver(InboundMessage { channel_id: "room-1".to_string(), sender: "alice".to_string(), text: "Hello".to_string(), attachments: vec![] })
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let sent = channel.sent_texts().await;
    assert_eq!(sent, vec![("room-1".to_string(), "Hi there".to_string())]);
}

/// S2 Delegation: a tool-using LLM reply delegates to a background worker,
/// whose completion lands back in the chat as a "Task completed:" reply.
#[tokio::test]
async fn s2_delegation_reports_background_task_completion() {
    let events = event_bus();

    struct ToolUseThenTextLlm {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ToolUseThenTextLlm {
        fn provider_id(&self) -> &str {
            "tool-use"
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
            "tool-use-1".to_string()
        }
        async fn chat(&self, _request: ChatRequest) -> Result<futures::stream::BoxStream<'static, ChatEvent>, UpstreamError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let events = if call == 0 {
                vec![
                    ChatEvent::ContentBlock(ContentBlock::ToolUse {
                        id: "call-1".to_string(),
                        name: "delegate_task".to_string(),
                        input: serde_json::json!({ "description": "Read README.md and summarize" }),
                    }),
                    ChatEvent::Done { stop_reason: StopReason::ToolUse },
                ]
            } else {
                vec![ChatEvent::TextDelta("Noted.".to_string()), ChatEvent::Done { stop_reason: StopReason::EndTurn }]
            };
            Ok(futures::stream::iter(events).boxed())
        }
        async fn compaction_chat(&self, _request: ChatRequest) -> Result<String, UpstreamError> {
            Ok(String::new())
        }
        async fn shutdown(&self) -> Result<(), UpstreamError> {
            Ok(())
        }
    }

    let llm: Arc<dyn LlmProvider> = Arc::new(ToolUseThenTextLlm { calls: AtomicUsize::new(0) });
    let store = SqliteStore::open_in_memory().await.unwrap();
    let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));
    let background_runner =
        Arc::new(BackgroundTaskRunner::new(Arc::new(EchoBackgroundWorker), events.clone(), BackgroundTasksConfig::default()));

    let router = Arc::new(ChannelRouter::new(
        llm,
        task_manager,
        background_runner,
        events,
        Arc::new(|| ChatSessionDeps::default()),
        QueueMode::Queue,
        5_000,
    ));

    let channel = Arc::new(InMemoryChannel::new("test"));
    router.clone().attach(channel.clone());

    channel
        .deliver(InboundMessage {
            channel_id: "room-2".to_string(),
            sender: "bob".to_string(),
            text: "Please read README.md and summarize it.".to_string(),
            attachments: vec![],
        })
        .await;

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let sent = channel.sent_texts().await;
    assert!(sent.iter().any(|(_, text)| text.starts_with("Task completed:")), "got {sent:?}");
}

/// S3 Concurrent cap: a third spawn into an already-saturated chat is
/// rejected and creates no new record.
#[tokio::test]
async fn s3_concurrent_cap_rejects_a_third_spawn() {
    let events = event_bus();
    let config = BackgroundTasksConfig { per_chat_concurrency: 2, ..BackgroundTasksConfig::default() };

    struct NeverFinishes;
    #[async_trait]
    impl BackgroundWorker for NeverFinishes {
        async fn run(
            &self,
            _description: String,
            cancel: CancellationToken,
            _progress: Arc<dyn Fn(String) + Send + Sync>,
        ) -> Result<String, String> {
            cancel.cancelled().await;
            Ok(String::new())
        }
    }

    let runner = BackgroundTaskRunner::new(Arc::new(NeverFinishes), events, config);
    runner.spawn("first", "c1", None, Default::default()).await.unwrap();
    runner.spawn("second", "c1", None, Default::default()).await.unwrap();

    let err = runner.spawn("third", "c1", None, Default::default()).await.unwrap_err();
    assert!(err.contains("already has 2 background tasks running"), "got: {err}");
}

/// S5 Swarm denial: an approval hook that refuses leaves the coordinator
/// reporting `Denied` with no agent ever run.
#[tokio::test]
async fn s5_swarm_denial_short_circuits_execution() {
    let events = event_bus();
    let store = SqliteStore::open_in_memory().await.unwrap();
    let llm: Arc<dyn LlmProvider> = Arc::new(FixedReplyLlm {
        reply: r#"[{"name":"general","role":"w","task":"t"}]"#.to_string(),
    });
    let registry = Arc::new(AgentRegistry::new(
        Arc::new(store.subagents.clone()),
        Arc::new(StubSubagentWorker),
        events.clone(),
        SwarmConfig::default(),
    ));
    registry.register(AgentDefinition::new("general", "general-purpose worker", "You are a general worker.")).await;

    let coordinator = SwarmCoordinator::new(llm, registry, Arc::new(DenyHook), None, events, 10, 60_000);
    let result = coordinator.run("do the thing").await.unwrap();

    assert_eq!(result.status, SwarmStatus::Denied);
    assert!(result.output.contains("denied"));
    assert!(result.agent_results.is_empty());
}

/// S6 Verification re-opens task: a failing verify command re-opens a
/// completed task with an incremented retry count.
#[tokio::test]
async fn s6_failed_verification_reopens_the_task() {
    let events = event_bus();
    let store = SqliteStore::open_in_memory().await.unwrap();
    let task_manager = Arc::new(TaskManager::new(Arc::new(store.tasks.clone()), events.clone()));

    let task = Task::new("Ship the feature", "desc");
    let task_id: TaskId = task_manager.submit(task).await.unwrap();
    task_manager.claim(task_id, "agent-1").await.unwrap();
    task_manager.complete(task_id).await.unwrap();

    let verifier = TaskVerifier::new(task_manager.clone(), events, 5_000, 3);
    let ok = verifier.verify(task_id, "Ship the feature", Some("false"), 1).await.unwrap();
    assert!(!ok);

    let fetched = store.tasks.get(task_id).await.unwrap().unwrap();
    assert_eq!(fetched.status, orchestra_core::domain::models::TaskStatus::Pending);
    assert_eq!(fetched.retry_count, 1);
    assert!(fetched.failure_context.contains("Verification failed"));
}

#[allow(dead_code)]
fn unused_session_id_reference(_: SessionId) {}
