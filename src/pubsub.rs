//! JetStream pub/sub adapter — connection, publish, subscribe, shutdown
//!
//! One adapter instance owns one shared broker connection, created by
//! `initialize` and reused by every publish and subscribe call. Each
//! subscription gets its own delivery loop task plus a watcher task that
//! unsubscribes when the caller's cancellation token fires.

use crate::auth::sign_nonce;
use crate::config::{AuthMode, JetStreamConfig};
use crate::delivery::{deliver_loop, watch_unsubscribe, JsMessage};
use crate::error::{PubSubError, Result};
use crate::options::consumer_config;
use crate::types::MessageHandler;
use async_nats::jetstream;
use async_nats::jetstream::consumer::{push, Consumer};
use async_nats::ConnectOptions;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Durable at-least-once pub/sub adapter over NATS JetStream
///
/// Construct with [`JetStreamPubSub::new`], then call [`initialize`] exactly
/// once before any other operation. Operations on an uninitialized adapter
/// return [`PubSubError::Connection`].
///
/// [`initialize`]: JetStreamPubSub::initialize
#[derive(Default)]
pub struct JetStreamPubSub {
    shared: OnceLock<Shared>,
}

/// Connection state created by `initialize`, shared by all operations
struct Shared {
    client: async_nats::Client,
    context: jetstream::Context,
    config: JetStreamConfig,
}

impl JetStreamPubSub {
    /// Create an uninitialized adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the property map, connect, and derive the JetStream context
    ///
    /// Fails with [`PubSubError::Config`] on malformed configuration and
    /// [`PubSubError::Connection`] on transport failure; either way the
    /// adapter retains no partial state. Not re-entrant — the host calls
    /// this exactly once.
    pub async fn initialize(&self, properties: &HashMap<String, String>) -> Result<()> {
        let config = JetStreamConfig::resolve(properties)?;

        let client = connect_options(&config)
            .connect(&config.url)
            .await
            .map_err(|e| PubSubError::Connection(format!("{}: {}", config.url, e)))?;
        tracing::debug!(url = %config.url, name = %config.name, "connected to NATS");

        let context = jetstream::new(client.clone());

        self.shared
            .set(Shared {
                client,
                context,
                config,
            })
            .map_err(|_| {
                PubSubError::Connection("adapter is already initialized".to_string())
            })?;

        tracing::debug!("JetStream initialization complete");
        Ok(())
    }

    /// Resolved configuration, including the reconnect retry policy
    pub fn config(&self) -> Result<&JetStreamConfig> {
        self.shared().map(|shared| &shared.config)
    }

    /// Publish a payload to a topic, waiting for the broker's ack
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        let shared = self.shared()?;
        tracing::debug!(topic = %topic, "publishing message");

        shared
            .context
            .publish(topic.to_string(), payload.into())
            .await
            .map_err(|e| PubSubError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| PubSubError::Publish {
                topic: topic.to_string(),
                reason: format!("ack failed: {}", e),
            })?;

        Ok(())
    }

    /// Subscribe to a topic with a per-message handler
    ///
    /// The effective queue group is `queue_group`, falling back to the
    /// configured `queueGroupName`; queue-grouped subscribers compete for
    /// messages. The subscription runs until `cancel` fires: cancellation
    /// stops the delivery loop between messages (in-flight handler calls
    /// finish naturally) and issues exactly one broker-side unsubscribe,
    /// whose failure is logged and never propagated.
    pub async fn subscribe(
        &self,
        cancel: CancellationToken,
        topic: &str,
        queue_group: Option<&str>,
        handler: impl MessageHandler + 'static,
    ) -> Result<()> {
        let shared = self.shared()?;
        let config = &shared.config;

        let stream_name = match &config.stream_name {
            Some(name) => name.clone(),
            None => lookup_stream_name(&shared.client, topic).await?,
        };

        let group = queue_group
            .map(str::to_string)
            .or_else(|| config.queue_group_name.clone());

        // Named consumers must bind across restarts and queue-group
        // members: a restarted durable subscriber finds its old consumer
        // still present, and a second group member must join the existing
        // consumer rather than race to create its own. A queue group
        // without an explicit durable shares a consumer named after the
        // group.
        let bind_name = config.durable_name.clone().or_else(|| group.clone());

        let mut consumer_cfg = consumer_config(
            config,
            topic,
            group.as_deref(),
            shared.client.new_inbox(),
        );
        consumer_cfg.durable_name = bind_name.clone();

        let existing: Option<Consumer<push::Config>> = match &bind_name {
            Some(name) => shared
                .context
                .get_consumer_from_stream(name, stream_name.clone())
                .await
                .ok(),
            None => None,
        };
        let consumer = match existing {
            Some(consumer) => consumer,
            None => shared
                .context
                .create_consumer_on_stream(consumer_cfg, stream_name.clone())
                .await
                .map_err(|e| PubSubError::Subscription {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })?,
        };
        let consumer_name = consumer.cached_info().name.clone();

        let messages = consumer
            .messages()
            .await
            .map_err(|e| PubSubError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        match &group {
            Some(group) => tracing::debug!(
                topic = %topic,
                queue_group = %group,
                stream = %stream_name,
                "subscribed with queue group"
            ),
            None => tracing::debug!(topic = %topic, stream = %stream_name, "subscribed"),
        }

        let loop_messages = messages.map(|next| next.map(JsMessage)).boxed();
        tokio::spawn(deliver_loop(
            topic.to_string(),
            loop_messages,
            Arc::new(handler),
            cancel.clone(),
        ));

        // Watcher: one unsubscribe attempt on cancellation; delete failure
        // is logged and swallowed inside the watcher.
        let context = shared.context.clone();
        let delete_name = consumer_name.clone();
        tokio::spawn(watch_unsubscribe(
            topic.to_string(),
            consumer_name,
            cancel,
            move || async move {
                context
                    .delete_consumer_from_stream(&delete_name, &stream_name)
                    .await
                    .map(|_| ())
                    .map_err(Into::into)
            },
        ));

        Ok(())
    }

    /// Drain the shared connection: flush in-flight acks and publishes,
    /// then disconnect
    ///
    /// Watcher tasks are not awaited; callers cancel subscriptions
    /// independently before or during close.
    pub async fn close(&self) -> Result<()> {
        let shared = self.shared()?;
        shared
            .client
            .drain()
            .await
            .map_err(|e| PubSubError::Shutdown(e.to_string()))
    }

    fn shared(&self) -> Result<&Shared> {
        self.shared
            .get()
            .ok_or_else(|| PubSubError::Connection("adapter is not initialized".to_string()))
    }
}

/// Build connect options for the resolved authentication mode
///
/// JWT mode registers a signing callback that copies the seed per nonce;
/// `sign_nonce` zeroes that copy before returning, so key material lives
/// for one challenge-response round trip only.
fn connect_options(config: &JetStreamConfig) -> ConnectOptions {
    let options = match &config.auth {
        AuthMode::UserJwt { jwt, seed } => {
            let seed = seed.clone();
            ConnectOptions::with_jwt(jwt.clone(), move |nonce| {
                let mut seed = seed.clone().into_bytes();
                async move {
                    sign_nonce(&mut seed, &nonce)
                        .map_err(|e| async_nats::AuthError::new(e.to_string()))
                }
            })
        }
        AuthMode::TlsClientAuth { cert, key } => {
            tracing::debug!("configuring TLS client authentication");
            ConnectOptions::new()
                .add_client_certificate(PathBuf::from(cert), PathBuf::from(key))
        }
        AuthMode::Anonymous => ConnectOptions::new(),
    };

    options.name(config.name.clone())
}

/// Find the stream serving a subject through the JetStream API
async fn lookup_stream_name(client: &async_nats::Client, topic: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct StreamNames {
        streams: Option<Vec<String>>,
    }

    let subscription_error = |reason: String| PubSubError::Subscription {
        topic: topic.to_string(),
        reason,
    };

    let request = serde_json::json!({ "subject": topic }).to_string();
    let response = client
        .request("$JS.API.STREAM.NAMES", request.into())
        .await
        .map_err(|e| subscription_error(format!("stream lookup failed: {}", e)))?;

    let names: StreamNames = serde_json::from_slice(&response.payload)
        .map_err(|e| subscription_error(format!("invalid stream lookup response: {}", e)))?;

    names
        .streams
        .and_then(|streams| streams.into_iter().next())
        .ok_or_else(|| subscription_error("no stream serves this subject".to_string()))
}
