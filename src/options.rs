//! Consumer option builder — configuration record to push consumer config
//!
//! Pure mapping with no side effects. Every numeric/duration field follows
//! the "zero value means omit" rule: an unset field leaves the broker
//! default in place. The replay position arrives already resolved as a
//! `StartPosition`, so the priority order between the mutually exclusive
//! fields is fixed upstream and not re-checked here.

use crate::config::{JetStreamConfig, StartPosition};
use async_nats::jetstream::consumer::push;
use async_nats::jetstream::consumer::{AckPolicy, DeliverPolicy};
use std::time::Duration;

/// Build the push consumer configuration for one subscription
///
/// `queue_group` is the effective competing-consumers group (call parameter
/// or configured fallback, decided by the caller); `deliver_subject` is the
/// per-subscription inbox the broker pushes messages to.
pub fn consumer_config(
    config: &JetStreamConfig,
    topic: &str,
    queue_group: Option<&str>,
    deliver_subject: String,
) -> push::Config {
    let deliver_policy = match config.start {
        StartPosition::FromTime(start_time) => DeliverPolicy::ByStartTime { start_time },
        StartPosition::FromSequence(start_sequence) => {
            DeliverPolicy::ByStartSequence { start_sequence }
        }
        StartPosition::DeliverAll => DeliverPolicy::All,
        StartPosition::DeliverLast => DeliverPolicy::Last,
    };

    let mut consumer = push::Config {
        deliver_subject,
        durable_name: config.durable_name.clone(),
        deliver_group: queue_group.map(str::to_string),
        filter_subject: topic.to_string(),
        deliver_policy,
        ack_policy: AckPolicy::Explicit,
        ..Default::default()
    };

    if config.flow_control {
        consumer.flow_control = true;
    }
    if config.ack_wait != Duration::ZERO {
        consumer.ack_wait = config.ack_wait;
    }
    if config.max_deliver != 0 {
        consumer.max_deliver = config.max_deliver;
    }
    if !config.backoff.is_empty() {
        consumer.backoff = config.backoff.clone();
    }
    if config.max_ack_pending != 0 {
        consumer.max_ack_pending = config.max_ack_pending;
    }
    if config.replicas != 0 {
        consumer.num_replicas = config.replicas;
    }
    if config.memory_storage {
        consumer.memory_storage = true;
    }
    if config.rate_limit != 0 {
        consumer.rate_limit = config.rate_limit;
    }
    if config.heartbeat != Duration::ZERO {
        consumer.idle_heartbeat = config.heartbeat;
    }

    consumer
}
