//! Session registry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of independent registry shards.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    /// Seconds between two expiry sweeps of a shard.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Idle seconds after which a session is evicted. `0` disables eviction.
    #[serde(default = "default_expiration")]
    pub expiration_seconds: u64,
    /// Mailbox enqueue timeout in milliseconds used for replies.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
}

impl SessionConfig {
    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Default session expiration as a [`Duration`].
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_seconds)
    }

    /// Reply enqueue timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            sweep_interval_seconds: default_sweep_interval(),
            expiration_seconds: default_expiration(),
            write_timeout_ms: default_write_timeout(),
        }
    }
}

fn default_shard_count() -> usize {
    16
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_expiration() -> u64 {
    300
}

fn default_write_timeout() -> u64 {
    1000
}
