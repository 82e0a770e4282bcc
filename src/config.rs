//! Session configuration.

use std::time::Duration;

use crate::reconnect::RetryPolicy;

/// Configuration for one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reconnection policy for the live stream.
    pub retry: RetryPolicy,
    /// Keepalive ping interval on the open channel.
    pub ping_interval: Duration,
    /// Capacity of the session event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            ping_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl SessionConfig {
    /// Create config from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            retry: RetryPolicy {
                max_attempts: std::env::var("COURIER_MAX_RECONNECT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_attempts),
                initial_backoff: Duration::from_millis(
                    std::env::var("COURIER_BACKOFF_INITIAL_MS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(500),
                ),
                max_backoff: Duration::from_secs(
                    std::env::var("COURIER_BACKOFF_MAX_SECS")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(30),
                ),
                backoff_multiplier: defaults.retry.backoff_multiplier,
            },
            ping_interval: Duration::from_secs(
                std::env::var("COURIER_PING_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            event_capacity: defaults.event_capacity,
        }
    }
}
