//! # a3s-jetstream
//!
//! Durable, at-least-once NATS JetStream pub/sub adapter for the A3S
//! ecosystem.
//!
//! ## Overview
//!
//! `a3s-jetstream` bridges a generic messaging abstraction to NATS
//! JetStream. A flat string-to-string property map resolves into rich
//! consumer semantics — replay position, flow control, redelivery backoff,
//! durability, queue groups, clustering replication — over one shared
//! broker connection with a dedicated delivery loop per subscription.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_jetstream::{HandlerFn, InboundMessage, JetStreamPubSub};
//! use std::collections::HashMap;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> a3s_jetstream::Result<()> {
//! let adapter = JetStreamPubSub::new();
//! adapter
//!     .initialize(&HashMap::from([
//!         ("natsURL".to_string(), "nats://127.0.0.1:4222".to_string()),
//!         ("durableName".to_string(), "orders-worker".to_string()),
//!         ("deliverAll".to_string(), "true".to_string()),
//!     ]))
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! adapter
//!     .subscribe(
//!         cancel.clone(),
//!         "orders.created",
//!         None,
//!         HandlerFn(|message: InboundMessage| async move {
//!             println!("received {} bytes on {}", message.payload.len(), message.topic);
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! adapter.publish("orders.created", &b"{\"id\": 1}"[..]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery semantics
//!
//! - Handler success acks the message; handler failure naks it and the
//!   broker redelivers per the configured redelivery policy.
//! - Messages on one subscription are processed sequentially; different
//!   subscriptions run independently.
//! - Ack/nak transmission failures inside the delivery loop are logged and
//!   swallowed — they never disrupt the host runtime.

pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod options;
pub mod pubsub;
pub mod retry;
pub mod types;

// Re-export core types
pub use config::{AuthMode, JetStreamConfig, StartPosition, DEFAULT_CONNECTION_NAME};
pub use delivery::AckableMessage;
pub use error::{PubSubError, Result};
pub use options::consumer_config;
pub use pubsub::JetStreamPubSub;
pub use retry::{BackOffPolicy, RetryConfig};
pub use types::{HandlerError, HandlerFn, InboundMessage, MessageHandler, METADATA_KEY_TOPIC};
