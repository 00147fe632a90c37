//! Runtime configuration consumed by the core.
//!
//! The core never loads configuration itself; embedders deserialize a
//! [`PoolConfig`] from whatever source they use and hand it in read-only.

use std::time::Duration;

use serde::Deserialize;

/// Settings consumed by the drivers and hardware facade.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Identity of the server owning this process's entities. Only devices
    /// and requests assigned to this server are polled for timeouts.
    #[serde(default = "PoolConfig::default_server_id")]
    pub server_id: String,

    /// Seconds between driver polling passes.
    #[serde(default = "PoolConfig::default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Default deadline for relay board operations, in seconds.
    #[serde(default = "PoolConfig::default_relay_timeout")]
    pub relay_timeout_seconds: u64,
}

impl PoolConfig {
    fn default_server_id() -> String {
        "localhost".to_string()
    }

    const fn default_poll_interval() -> u64 {
        10
    }

    const fn default_relay_timeout() -> u64 {
        30
    }

    /// Get the poll interval as a `Duration`.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Get the relay operation deadline as a `Duration`.
    #[must_use]
    pub const fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_seconds)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            server_id: Self::default_server_id(),
            poll_interval_seconds: Self::default_poll_interval(),
            relay_timeout_seconds: Self::default_relay_timeout(),
        }
    }
}
