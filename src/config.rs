//! Configuration resolution — flat property map to typed config record
//!
//! The host runtime hands the adapter a string-to-string property map.
//! `JetStreamConfig::resolve` coerces recognized keys into typed fields and
//! collapses the mutually exclusive field groups (authentication mode, replay
//! position) into single resolved enums so the priority rules live in one
//! place. Unknown keys are ignored. No network or file I/O happens here.

use crate::error::{PubSubError, Result};
use crate::retry::RetryConfig;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;

/// Default human-readable connection name
pub const DEFAULT_CONNECTION_NAME: &str = "a3s-jetstream";

/// How the connection authenticates to the broker
///
/// Resolved once from the property map. When both the JWT pair and the TLS
/// pair are present, JWT wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// JWT plus NKey seed — challenge-response signing
    UserJwt { jwt: String, seed: String },
    /// Mutual TLS with a client certificate/key file pair
    TlsClientAuth { cert: String, key: String },
    /// No credentials
    Anonymous,
}

/// Where a new consumer starts reading the stream
///
/// Resolved once from the property map in fixed priority order:
/// start time > start sequence > deliver-all > deliver-last (default).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StartPosition {
    /// Replay from a point in time
    FromTime(OffsetDateTime),
    /// Replay from a stream sequence number
    FromSequence(u64),
    /// Replay everything the stream retains
    DeliverAll,
    /// Only the latest message onward
    #[default]
    DeliverLast,
}

/// Resolved adapter configuration — immutable after resolution
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// Broker URL (required)
    pub url: String,

    /// Connection name shown in broker monitoring
    pub name: String,

    /// Authentication mode
    pub auth: AuthMode,

    /// Durable consumer name — subscription position survives restarts
    pub durable_name: Option<String>,

    /// Queue group for competing-consumers delivery
    pub queue_group_name: Option<String>,

    /// Stream to bind subscriptions to; looked up by subject when unset
    pub stream_name: Option<String>,

    /// Replay position for new consumers
    pub start: StartPosition,

    /// Enable broker-side flow control
    pub flow_control: bool,

    /// Ack timeout before redelivery (zero = broker default)
    pub ack_wait: Duration,

    /// Max delivery attempts (zero = unlimited)
    pub max_deliver: i64,

    /// Redelivery backoff schedule (empty = disabled)
    pub backoff: Vec<Duration>,

    /// Max unacknowledged messages in flight (zero = broker default)
    pub max_ack_pending: i64,

    /// Consumer replicas (zero = broker default)
    pub replicas: usize,

    /// Keep consumer state in memory rather than on disk
    pub memory_storage: bool,

    /// Delivery rate limit in bits/sec (zero = unlimited)
    pub rate_limit: u64,

    /// Idle heartbeat interval (zero = disabled)
    pub heartbeat: Duration,

    /// Adapter-side reconnect retry policy, decoded under the `backOff`
    /// key prefix. Distinct from the per-message redelivery `backOff` list.
    pub retry: RetryConfig,
}

impl JetStreamConfig {
    /// Resolve a property map into a typed configuration record
    pub fn resolve(properties: &HashMap<String, String>) -> Result<Self> {
        let url = match properties.get("natsURL") {
            Some(v) if !v.is_empty() => v.clone(),
            _ => {
                return Err(PubSubError::Config(
                    "missing required property 'natsURL'".to_string(),
                ))
            }
        };

        let name = properties
            .get("name")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_CONNECTION_NAME.to_string());

        Ok(Self {
            url,
            name,
            auth: resolve_auth(properties),
            durable_name: non_empty(properties, "durableName"),
            queue_group_name: non_empty(properties, "queueGroupName"),
            stream_name: non_empty(properties, "streamName"),
            start: resolve_start(properties)?,
            flow_control: parse_key(properties, "flowControl", parse_bool)?
                .unwrap_or(false),
            ack_wait: parse_key(properties, "ackWait", parse_duration)?
                .unwrap_or(Duration::ZERO),
            max_deliver: parse_key(properties, "maxDeliver", parse_int)?.unwrap_or(0),
            backoff: parse_key(properties, "backOff", parse_duration_list)?
                .unwrap_or_default(),
            max_ack_pending: parse_key(properties, "maxAckPending", parse_int)?
                .unwrap_or(0),
            replicas: parse_key(properties, "replicas", parse_uint)?.unwrap_or(0)
                as usize,
            memory_storage: parse_key(properties, "memoryStorage", parse_bool)?
                .unwrap_or(false),
            rate_limit: parse_key(properties, "rateLimit", parse_uint)?.unwrap_or(0),
            heartbeat: parse_key(properties, "heartbeat", parse_duration)?
                .unwrap_or(Duration::ZERO),
            retry: RetryConfig::decode_with_prefix(properties, "backOff")?,
        })
    }
}

/// Select the authentication mode by field presence, JWT first
fn resolve_auth(properties: &HashMap<String, String>) -> AuthMode {
    let jwt = non_empty(properties, "jwt");
    let seed = non_empty(properties, "seedKey");
    if let (Some(jwt), Some(seed)) = (jwt, seed) {
        return AuthMode::UserJwt { jwt, seed };
    }

    let cert = non_empty(properties, "tlsClientCert");
    let key = non_empty(properties, "tlsClientKey");
    if let (Some(cert), Some(key)) = (cert, key) {
        return AuthMode::TlsClientAuth { cert, key };
    }

    AuthMode::Anonymous
}

/// Collapse the replay-position fields into one choice, in priority order
fn resolve_start(properties: &HashMap<String, String>) -> Result<StartPosition> {
    if let Some(secs) = parse_key(properties, "startTime", parse_int)? {
        if secs > 0 {
            let time = OffsetDateTime::from_unix_timestamp(secs).map_err(|e| {
                PubSubError::Config(format!("invalid 'startTime' value: {}", e))
            })?;
            return Ok(StartPosition::FromTime(time));
        }
    }

    if let Some(seq) = parse_key(properties, "startSequence", parse_uint)? {
        if seq > 0 {
            return Ok(StartPosition::FromSequence(seq));
        }
    }

    if parse_key(properties, "deliverAll", parse_bool)?.unwrap_or(false) {
        return Ok(StartPosition::DeliverAll);
    }

    Ok(StartPosition::DeliverLast)
}

fn non_empty(properties: &HashMap<String, String>, key: &str) -> Option<String> {
    properties.get(key).filter(|v| !v.is_empty()).cloned()
}

/// Coerce one optional key; absent or empty values resolve to `None`
fn parse_key<T>(
    properties: &HashMap<String, String>,
    key: &str,
    parse: impl Fn(&str) -> std::result::Result<T, String>,
) -> Result<Option<T>> {
    match properties.get(key).filter(|v| !v.is_empty()) {
        Some(raw) => parse(raw)
            .map(Some)
            .map_err(|e| PubSubError::Config(format!("invalid '{}' value: {}", key, e))),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}

fn parse_int(raw: &str) -> std::result::Result<i64, String> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not an integer", raw))
}

fn parse_uint(raw: &str) -> std::result::Result<u64, String> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| format!("'{}' is not an unsigned integer", raw))
}

/// Parse a Go-style duration literal: one or more `<number><unit>` segments
/// where unit is ns, us, ms, s, m, or h (e.g. `"500ms"`, `"1m30s"`)
pub(crate) fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| format!("'{}' is missing a duration unit", raw))?;
        if digits_end == 0 {
            return Err(format!("'{}' is not a duration", raw));
        }

        let value: f64 = rest[..digits_end]
            .parse()
            .map_err(|_| format!("'{}' is not a duration", raw))?;
        rest = &rest[digits_end..];

        let (unit, len) = if rest.starts_with("ns") {
            (1e-9, 2)
        } else if rest.starts_with("us") {
            (1e-6, 2)
        } else if rest.starts_with("ms") {
            (1e-3, 2)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else {
            return Err(format!("'{}' has an unknown duration unit", raw));
        };
        rest = &rest[len..];

        let step = Duration::try_from_secs_f64(value * unit)
            .map_err(|_| format!("'{}' is out of range", raw))?;
        total = total
            .checked_add(step)
            .ok_or_else(|| format!("'{}' is out of range", raw))?;
    }

    Ok(total)
}

/// Parse a comma-separated list of duration literals
fn parse_duration_list(raw: &str) -> std::result::Result<Vec<Duration>, String> {
    raw.split(',').map(|part| parse_duration(part)).collect()
}
