//! ChannelRouter: binds inbound messages from any number of `Channel`
//! collaborators to a per-chat `ChatSession`, sharing one
//! `BackgroundTaskRunner` and `LlmProvider` across every chat.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::domain::models::QueueMode;
use crate::domain::ports::channel::InboundMessage;
use crate::domain::ports::{Channel, LlmProvider};
use crate::services::background_task_runner::BackgroundTaskRunner;
use crate::services::chat_session::{ChatSession, ChatSessionDeps};
use crate::services::event_bus::EventBus;
use crate::services::task_manager::TaskManager;

/// Builds the per-session dependencies (complexity classifier, swarm
/// runner) fresh for each chat, since a swarm run is stateful per chat.
pub type ChatSessionDepsFactory = Arc<dyn Fn() -> ChatSessionDeps + Send + Sync>;

pub struct ChannelRouter {
    llm: Arc<dyn LlmProvider>,
    task_manager: Arc<TaskManager>,
    background_runner: Arc<BackgroundTaskRunner>,
    events: Arc<EventBus>,
    deps_factory: ChatSessionDepsFactory,
    queue_mode: QueueMode,
    collect_window_ms: u64,
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
}

impl ChannelRouter {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        task_manager: Arc<TaskManager>,
        background_runner: Arc<BackgroundTaskRunner>,
        events: Arc<EventBus>,
        deps_factory: ChatSessionDepsFactory,
        queue_mode: QueueMode,
        collect_window_ms: u64,
    ) -> Self {
        Self {
            llm,
            task_manager,
            background_runner,
            events,
            deps_factory,
            queue_mode,
            collect_window_ms,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn chat_key(channel: &dyn Channel, message: &InboundMessage) -> String {
        format!("{}:{}", channel.id(), message.channel_id)
    }

    /// Wire this router as the inbound-message handler for `channel`.
    /// Replies are sent back over the same channel once the dialog/swarm
    /// turn resolves.
    pub fn attach(self: &Arc<Self>, channel: Arc<dyn Channel>) {
        let router = self.clone();
        let channel_for_handler = channel.clone();
        channel.on(Box::new(move |message: InboundMessage| {
            let router = router.clone();
            let channel = channel_for_handler.clone();
            tokio::spawn(async move {
                router.dispatch(channel, message).await;
            });
        }));
    }

    #[instrument(skip(self, channel, message), fields(channel_id = %channel.id()))]
    async fn dispatch(&self, channel: Arc<dyn Channel>, message: InboundMessage) {
        let chat_key = Self::chat_key(channel.as_ref(), &message);
        let session = self.get_or_create_session(&chat_key, channel.clone(), message.channel_id.clone()).await;

        if let Some(reply) = session.handle_message(self.queue_mode, message.text.clone()).await {
            if let Err(err) = channel.send_text(&message.channel_id, &reply).await {
                warn!(chat_key, error = %err, "failed to deliver reply to channel");
            }
        }
    }

    /// Look up an existing session for `chat_key`, creating and wiring one
    /// on first use. `channel`/`channel_id` back the reply sink used for
    /// replies that aren't handed back synchronously, such as a background
    /// task completion or a collect-mode auto-flush.
    pub async fn get_or_create_session(
        &self,
        chat_key: &str,
        channel: Arc<dyn Channel>,
        channel_id: String,
    ) -> Arc<ChatSession> {
        if let Some(existing) = self.sessions.read().await.get(chat_key) {
            return existing.clone();
        }

        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(chat_key) {
            return existing.clone();
        }

        let session = Arc::new(ChatSession::new(
            chat_key,
            self.llm.clone(),
            self.task_manager.clone(),
            self.background_runner.clone(),
            self.events.clone(),
            (self.deps_factory)(),
            self.collect_window_ms,
        ));

        let deliver = {
            let channel = channel.clone();
            let channel_id = channel_id.clone();
            move |reply: String| {
                let channel = channel.clone();
                let channel_id = channel_id.clone();
                tokio::spawn(async move {
                    if let Err(err) = channel.send_text(&channel_id, &reply).await {
                        warn!(error = %err, "failed to deliver out-of-band reply to channel");
                    }
                });
            }
        };
        session.subscribe_background_completions(Arc::new(deliver.clone())).await;
        session.set_reply_sink(Arc::new(deliver)).await;
        info!(chat_key, "chat session created");
        sessions.insert(chat_key.to_string(), session.clone());
        session
    }

    /// Stop and drop every tracked session.
    pub async fn stop_all(&self) {
        let mut sessions = self.sessions.write().await;
        for session in sessions.values() {
            session.stop().await;
        }
        sessions.clear();
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
