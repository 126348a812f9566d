//! Message and handler types for the JetStream adapter

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;

/// Metadata key carrying the originating broker subject
pub const METADATA_KEY_TOPIC: &str = "Topic";

/// A broker-delivered message handed to a subscription handler
///
/// Broker sequence metadata is used by the adapter for logging only; handlers
/// see the subject, the payload, and the string metadata map.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Topic the subscription was created on
    pub topic: String,

    /// Raw payload bytes
    pub payload: Bytes,

    /// String metadata; always contains the originating subject under
    /// [`METADATA_KEY_TOPIC`]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// Build a message for a subject and payload, populating the metadata map
    pub fn new(topic: impl Into<String>, subject: &str, payload: Bytes) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(METADATA_KEY_TOPIC.to_string(), subject.to_string());
        Self {
            topic: topic.into(),
            payload,
            metadata,
        }
    }
}

/// Error type returned by subscription handlers
///
/// A handler error triggers a negative acknowledgement; the broker redelivers
/// per the configured redelivery policy.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// User callback invoked for each delivered message
///
/// Invocations on one subscription never overlap; the delivery loop awaits
/// each call before taking the next message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message; `Ok` acks it, `Err` naks it
    async fn handle(&self, message: InboundMessage) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`]
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, message: InboundMessage) -> Result<(), HandlerError> {
        (self.0)(message).await
    }
}
