//! Outbound reconnecting client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnecting WebSocket client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upstream `ws://` URL to keep a link open to; no client when absent.
    #[serde(default)]
    pub upstream_url: Option<String>,
    /// Seconds between two keepalive payloads. `0` disables keepalive.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// Seconds to wait between two failed dial attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

impl ClientConfig {
    /// Keepalive interval as a [`Duration`].
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_seconds)
    }

    /// Retry delay as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            upstream_url: None,
            keepalive_interval_seconds: default_keepalive_interval(),
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_retry_delay() -> u64 {
    5
}
