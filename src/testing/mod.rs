//! Test doubles for the collaborator ports. Never wired as defaults in
//! `main.rs` — a real deployment always injects a concrete `LlmProvider`
//! and `Channel`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::errors::UpstreamError;
use crate::domain::ports::channel::{Attachment, InboundMessage, Subscription};
use crate::domain::ports::llm_provider::{ChatEvent, ChatRequest, ModelInfo, StopReason};
use crate::domain::ports::{Channel, LlmProvider};

/// An `LlmProvider` that returns a scripted reply for every chat call,
/// FIFO, falling back to a fixed canned reply once the script is
/// exhausted. Useful for exercising dialog/swarm flows without a real
/// model transport.
pub struct MockLlmProvider {
    default_model: String,
    scripted_replies: Mutex<Vec<String>>,
    fallback_reply: String,
}

impl MockLlmProvider {
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            default_model: default_model.into(),
            scripted_replies: Mutex::new(Vec::new()),
            fallback_reply: "ok".to_string(),
        }
    }

    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = reply.into();
        self
    }

    /// Queue replies to be returned in order, one per `chat` call.
    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.scripted_replies.lock().await.push(reply.into());
    }

    async fn next_reply(&self) -> String {
        let mut replies = self.scripted_replies.lock().await;
        if replies.is_empty() {
            self.fallback_reply.clone()
        } else {
            replies.remove(0)
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn provider_id(&self) -> &str {
        "mock"
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
        Ok(vec![ModelInfo { id: self.default_model.clone(), display_name: "Mock Model".to_string(), context_window: 200_000 }])
    }

    fn get_default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn chat(&self, _request: ChatRequest) -> Result<BoxStream<'static, ChatEvent>, UpstreamError> {
        let reply = self.next_reply().await;
        let events = vec![ChatEvent::TextDelta(reply), ChatEvent::Done { stop_reason: StopReason::EndTurn }];
        Ok(futures::stream::iter(events).boxed())
    }

    async fn compaction_chat(&self, _request: ChatRequest) -> Result<String, UpstreamError> {
        Ok(self.next_reply().await)
    }

    async fn shutdown(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// An in-process `Channel` that records every outbound send and lets a
/// test fire inbound messages directly, without any real transport.
pub struct InMemoryChannel {
    id: String,
    connected: RwLock<bool>,
    sent_text: Mutex<Vec<(String, String)>>,
    handlers: Mutex<Vec<Box<dyn Fn(InboundMessage) + Send + Sync>>>,
}

impl InMemoryChannel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected: RwLock::new(false),
            sent_text: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `message` to every registered handler, as a real channel
    /// driver would on receipt of an inbound event.
    pub async fn deliver(&self, message: InboundMessage) {
        for handler in self.handlers.lock().await.iter() {
            handler(message.clone());
        }
    }

    pub async fn sent_texts(&self) -> Vec<(String, String)> {
        self.sent_text.lock().await.clone()
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn channel_type(&self) -> &str {
        "in_memory"
    }

    async fn connected(&self) -> bool {
        *self.connected.read().await
    }

    async fn connect(&self) -> Result<(), UpstreamError> {
        *self.connected.write().await = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), UpstreamError> {
        *self.connected.write().await = false;
        Ok(())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), UpstreamError> {
        self.sent_text.lock().await.push((to.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_media(&self, _to: &str, _attachment: Attachment) -> Result<(), UpstreamError> {
        Ok(())
    }

    async fn download_attachment(&self, id: &str) -> Result<Attachment, UpstreamError> {
        Err(UpstreamError::Transport(format!("in-memory channel has no attachment {id}")))
    }

    fn on(&self, handler: Box<dyn Fn(InboundMessage) + Send + Sync>) -> Subscription {
        let mut handlers = self.handlers.try_lock().expect("on() is called at wiring time, never concurrently with deliver()");
        handlers.push(handler);
        Subscription(handlers.len() as u64)
    }
}
