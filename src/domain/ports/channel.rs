//! Channel port: the abstraction over any inbound/outbound chat transport
//! (CLI, Slack, Discord, SMS, ...). The concrete adapters are external
//! collaborators this crate never implements.

use async_trait::async_trait;

use crate::domain::errors::UpstreamError;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub sender: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Handle returned by `Channel::on`, allowing a caller to deregister its
/// handler. Dropping the handle does not unsubscribe; callers must call
/// `unsubscribe` explicitly, mirroring `EventBus`'s contract.
pub struct Subscription(pub u64);

#[async_trait]
pub trait Channel: Send + Sync {
    fn id(&self) -> &str;

    fn channel_type(&self) -> &str;

    async fn connected(&self) -> bool;

    async fn connect(&self) -> Result<(), UpstreamError>;

    async fn disconnect(&self) -> Result<(), UpstreamError>;

    async fn send_text(&self, to: &str, text: &str) -> Result<(), UpstreamError>;

    async fn send_media(&self, to: &str, attachment: Attachment) -> Result<(), UpstreamError>;

    async fn download_attachment(&self, id: &str) -> Result<Attachment, UpstreamError>;

    /// Register a handler invoked for every inbound message. Returns a
    /// subscription id usable to deregister later.
    fn on(&self, handler: Box<dyn Fn(InboundMessage) + Send + Sync>) -> Subscription;
}
