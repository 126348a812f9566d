//! Reconnect retry policy configuration
//!
//! Decoded from the same property map as the main configuration, under a key
//! prefix (`backOffPolicy`, `backOffDuration`, …). This governs adapter-side
//! connection retry and is distinct from the per-message redelivery backoff
//! list carried by the bare `backOff` key — the two share a naming convention
//! only. The transport reconnects on its own; the decoded policy is validated
//! at initialization and exposed for the host runtime.

use crate::config::parse_duration;
use crate::error::{PubSubError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Retry cadence shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackOffPolicy {
    /// Fixed interval between attempts
    #[default]
    Constant,
    /// Exponentially growing interval with jitter
    Exponential,
}

/// Adapter-side connection retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Cadence shape
    pub policy: BackOffPolicy,

    /// Interval for the constant policy
    pub duration: Duration,

    /// First interval for the exponential policy
    pub initial_interval: Duration,

    /// Jitter factor applied to each exponential interval
    pub randomization_factor: f64,

    /// Growth factor between exponential intervals
    pub multiplier: f64,

    /// Upper bound on a single exponential interval
    pub max_interval: Duration,

    /// Give up after this much total elapsed time (zero = never)
    pub max_elapsed_time: Duration,

    /// Give up after this many attempts (negative = unlimited)
    pub max_retries: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: BackOffPolicy::Constant,
            duration: Duration::from_secs(5),
            initial_interval: Duration::from_millis(500),
            randomization_factor: 0.5,
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: Duration::from_secs(15 * 60),
            max_retries: -1,
        }
    }
}

impl RetryConfig {
    /// Decode a retry policy from prefixed keys in a property map
    ///
    /// Keys are `<prefix>Policy`, `<prefix>Duration`, `<prefix>InitialInterval`,
    /// `<prefix>RandomizationFactor`, `<prefix>Multiplier`, `<prefix>MaxInterval`,
    /// `<prefix>MaxElapsedTime`, and `<prefix>MaxRetries`. Absent keys keep
    /// their defaults; a bare `<prefix>` key is not consumed here.
    pub fn decode_with_prefix(
        properties: &HashMap<String, String>,
        prefix: &str,
    ) -> Result<Self> {
        let mut config = Self::default();
        let get = |suffix: &str| {
            properties
                .get(&format!("{}{}", prefix, suffix))
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = get("Policy") {
            config.policy = match raw.trim().to_ascii_lowercase().as_str() {
                "constant" => BackOffPolicy::Constant,
                "exponential" => BackOffPolicy::Exponential,
                other => {
                    return Err(PubSubError::Config(format!(
                        "unknown retry policy '{}'",
                        other
                    )))
                }
            };
        }

        if let Some(raw) = get("Duration") {
            config.duration = decode_duration(prefix, "Duration", raw)?;
        }
        if let Some(raw) = get("InitialInterval") {
            config.initial_interval = decode_duration(prefix, "InitialInterval", raw)?;
        }
        if let Some(raw) = get("RandomizationFactor") {
            config.randomization_factor = decode_float(prefix, "RandomizationFactor", raw)?;
        }
        if let Some(raw) = get("Multiplier") {
            config.multiplier = decode_float(prefix, "Multiplier", raw)?;
        }
        if let Some(raw) = get("MaxInterval") {
            config.max_interval = decode_duration(prefix, "MaxInterval", raw)?;
        }
        if let Some(raw) = get("MaxElapsedTime") {
            config.max_elapsed_time = decode_duration(prefix, "MaxElapsedTime", raw)?;
        }
        if let Some(raw) = get("MaxRetries") {
            config.max_retries = raw.trim().parse().map_err(|_| {
                PubSubError::Config(format!(
                    "invalid '{}MaxRetries' value: '{}' is not an integer",
                    prefix, raw
                ))
            })?;
        }

        Ok(config)
    }
}

fn decode_duration(prefix: &str, suffix: &str, raw: &str) -> Result<Duration> {
    parse_duration(raw).map_err(|e| {
        PubSubError::Config(format!("invalid '{}{}' value: {}", prefix, suffix, e))
    })
}

fn decode_float(prefix: &str, suffix: &str, raw: &str) -> Result<f64> {
    raw.trim().parse().map_err(|_| {
        PubSubError::Config(format!(
            "invalid '{}{}' value: '{}' is not a number",
            prefix, suffix, raw
        ))
    })
}
