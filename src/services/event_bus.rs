//! EventBus: synchronous handler registration over an asynchronously
//! dispatched event stream.
//!
//! Unlike the teacher's broadcast-channel event system, this bus exposes a
//! Node-`EventEmitter`-shaped contract: `on` registers a handler and
//! returns an id usable with `off`; `emit` awaits every registered handler
//! in subscription order, catching (and logging) a handler's panic or
//! error so one bad handler cannot poison delivery to the rest.

use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type HandlerId = u64;

type Handler = Arc<dyn Fn(Value) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

struct Registration {
    id: HandlerId,
    handler: Handler,
}

/// An in-process publish/subscribe bus keyed by event name.
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<String, Vec<Registration>>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `event`. Returns an id that `off` accepts to
    /// deregister it. Handlers for the same event run in the order they
    /// were registered.
    pub async fn on<F, Fut>(&self, event: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let boxed: Handler = Arc::new(move |payload| Box::pin(handler(payload)));
        let mut handlers = self.handlers.write().await;
        handlers.entry(event.into()).or_default().push(Registration { id, handler: boxed });
        id
    }

    /// Deregister a handler previously returned by `on`. Returns whether a
    /// matching registration was found and removed.
    pub async fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write().await;
        if let Some(list) = handlers.get_mut(event) {
            let before = list.len();
            list.retain(|r| r.id != id);
            return list.len() != before;
        }
        false
    }

    pub async fn remove_all_listeners(&self, event: Option<&str>) {
        let mut handlers = self.handlers.write().await;
        match event {
            Some(event) => {
                handlers.remove(event);
            }
            None => handlers.clear(),
        }
    }

    pub async fn listener_count(&self, event: &str) -> usize {
        self.handlers.read().await.get(event).map_or(0, Vec::len)
    }

    /// Invoke every handler registered for `event` with `payload`, in
    /// subscription order. Handlers run sequentially so ordering is
    /// deterministic; a handler that itself awaits slow I/O delays later
    /// handlers for the same emit.
    pub async fn emit(&self, event: &str, payload: Value) {
        let snapshot: Vec<Handler> = {
            let handlers = self.handlers.read().await;
            handlers.get(event).map(|list| list.iter().map(|r| r.handler.clone()).collect()).unwrap_or_default()
        };

        for handler in snapshot {
            let guarded = std::panic::AssertUnwindSafe(handler(payload.clone())).catch_unwind();
            if let Err(panic) = guarded.await {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::warn!(event, message, "event handler panicked; continuing dispatch to remaining handlers");
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use serde_json::json;

    #[tokio::test]
    async fn handlers_fire_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        bus.on("task:completed", move |_| {
            let order_a = order_a.clone();
            async move { order_a.lock().await.push("a") }
        })
        .await;

        let order_b = order.clone();
        bus.on("task:completed", move |_| {
            let order_b = order_b.clone();
            async move { order_b.lock().await.push("b") }
        })
        .await;

        bus.emit("task:completed", json!({})).await;
        assert_eq!(*order.lock().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn off_removes_only_the_matching_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count_a = count.clone();
        let id_a = bus
            .on("x", move |_| {
                let count_a = count_a.clone();
                async move {
                    count_a.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        assert_eq!(bus.listener_count("x").await, 1);
        assert!(bus.off("x", id_a).await);
        assert_eq!(bus.listener_count("x").await, 0);
        assert!(!bus.off("x", id_a).await);
    }

    #[tokio::test]
    async fn remove_all_listeners_clears_one_or_all_events() {
        let bus = EventBus::new();
        bus.on("a", |_| async {}).await;
        bus.on("b", |_| async {}).await;

        bus.remove_all_listeners(Some("a")).await;
        assert_eq!(bus.listener_count("a").await, 0);
        assert_eq!(bus.listener_count("b").await, 1);

        bus.remove_all_listeners(None).await;
        assert_eq!(bus.listener_count("b").await, 0);
    }

    #[tokio::test]
    async fn emit_on_event_with_no_handlers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit("nobody:listening", serde_json::json!({})).await;
    }
}
