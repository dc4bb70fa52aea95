//! SwarmMessageBus: per-agent inbox queues for a single swarm run.

use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::domain::models::{SwarmAgentId, SwarmMessage};
use crate::services::event_bus::EventBus;
use std::sync::Arc;

pub struct SwarmMessageBus {
    registered: RwLock<HashSet<SwarmAgentId>>,
    inboxes: RwLock<HashMap<SwarmAgentId, VecDeque<SwarmMessage>>>,
    events: Arc<EventBus>,
}

impl SwarmMessageBus {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            registered: RwLock::new(HashSet::new()),
            inboxes: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub async fn register(&self, agent: SwarmAgentId) {
        self.registered.write().await.insert(agent);
        self.inboxes.write().await.entry(agent).or_default();
    }

    pub async fn unregister(&self, agent: SwarmAgentId) {
        self.registered.write().await.remove(&agent);
        self.inboxes.write().await.remove(&agent);
    }

    /// Deliver `message` to its recipient. Rejects delivery to an
    /// unregistered agent.
    #[instrument(skip(self, message), err)]
    pub async fn send(&self, message: SwarmMessage) -> Result<(), String> {
        let Some(to) = message.to else {
            return Err("send requires an explicit recipient; use broadcast otherwise".to_string());
        };
        if !self.registered.read().await.contains(&to) {
            return Err(format!("unknown recipient {to}"));
        }
        self.inboxes.write().await.entry(to).or_default().push_back(message.clone());
        self.events
            .emit("swarm:message", serde_json::json!({ "from": message.from.to_string(), "to": to.to_string() }))
            .await;
        Ok(())
    }

    /// Deliver `content` from `from` to every other registered agent.
    pub async fn broadcast(&self, from: SwarmAgentId, content: impl Into<String>) -> usize {
        let content = content.into();
        let recipients: Vec<SwarmAgentId> = self.registered.read().await.iter().filter(|a| **a != from).copied().collect();

        let mut inboxes = self.inboxes.write().await;
        for recipient in &recipients {
            inboxes.entry(*recipient).or_default().push_back(SwarmMessage {
                from,
                to: Some(*recipient),
                body: content.clone(),
                sent_at: chrono::Utc::now(),
            });
        }
        drop(inboxes);

        self.events
            .emit("swarm:broadcast", serde_json::json!({ "from": from.to_string(), "recipient_count": recipients.len() }))
            .await;
        recipients.len()
    }

    /// Drain and return every pending message for `agent`.
    pub async fn get_messages(&self, agent: SwarmAgentId) -> Vec<SwarmMessage> {
        self.inboxes
            .write()
            .await
            .get_mut(&agent)
            .map(|inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    pub async fn has_messages(&self, agent: SwarmAgentId) -> bool {
        self.inboxes.read().await.get(&agent).map_or(false, |inbox| !inbox.is_empty())
    }

    pub async fn clear(&self) {
        self.registered.write().await.clear();
        self.inboxes.write().await.clear();
    }
}
