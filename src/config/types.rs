//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tailing engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Interval of the mtime/size poll that backs up change notifications.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl WatchConfig {
    /// Poll interval as a `Duration`, never shorter than 1 ms.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Dynamic discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Coalescing delay applied to directory change notifications.
    #[serde(default = "default_rescan_debounce_ms")]
    pub rescan_debounce_ms: u64,
    /// Delay before the rescan scheduled by an early trigger.
    #[serde(default = "default_early_rescan_delay_ms")]
    pub early_rescan_delay_ms: u64,
    /// Wait before the first attach attempt of a newly registered source.
    #[serde(default = "default_attach_initial_delay_ms")]
    pub attach_initial_delay_ms: u64,
    /// Fixed delay between attach attempts.
    #[serde(default = "default_attach_retry_delay_ms")]
    pub attach_retry_delay_ms: u64,
    /// Number of existence polls before giving up on a source file.
    #[serde(default = "default_attach_max_retries")]
    pub attach_max_retries: u32,
    /// Upper bound on the number of ids the discovery registry will accept.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

fn default_rescan_debounce_ms() -> u64 {
    100
}

fn default_early_rescan_delay_ms() -> u64 {
    500
}

fn default_attach_initial_delay_ms() -> u64 {
    100
}

fn default_attach_retry_delay_ms() -> u64 {
    200
}

fn default_attach_max_retries() -> u32 {
    25
}

fn default_max_sources() -> usize {
    crate::watcher::DEFAULT_MAX_SUBAGENTS
}

impl DiscoveryConfig {
    /// Debounce window, never shorter than 1 ms.
    #[must_use]
    pub fn rescan_debounce(&self) -> Duration {
        Duration::from_millis(self.rescan_debounce_ms.max(1))
    }

    #[must_use]
    pub fn early_rescan_delay(&self) -> Duration {
        Duration::from_millis(self.early_rescan_delay_ms)
    }

    #[must_use]
    pub fn attach_initial_delay(&self) -> Duration {
        Duration::from_millis(self.attach_initial_delay_ms)
    }

    #[must_use]
    pub fn attach_retry_delay(&self) -> Duration {
        Duration::from_millis(self.attach_retry_delay_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rescan_debounce_ms: default_rescan_debounce_ms(),
            early_rescan_delay_ms: default_early_rescan_delay_ms(),
            attach_initial_delay_ms: default_attach_initial_delay_ms(),
            attach_retry_delay_ms: default_attach_retry_delay_ms(),
            attach_max_retries: default_attach_max_retries(),
            max_sources: default_max_sources(),
        }
    }
}

/// Session registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Maximum buffered lines per session before oldest-first eviction.
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
    /// Switch to newly discovered sessions automatically.
    #[serde(default)]
    pub follow_new: bool,
    /// Delay before an automatic switch takes effect.
    #[serde(default = "default_switch_delay_ms")]
    pub switch_delay_ms: u64,
}

fn default_buffer_limit() -> usize {
    crate::session::DEFAULT_BUFFER_LIMIT
}

fn default_switch_delay_ms() -> u64 {
    1500
}

impl SessionsConfig {
    #[must_use]
    pub fn switch_delay(&self) -> Duration {
        Duration::from_millis(self.switch_delay_ms)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            buffer_limit: default_buffer_limit(),
            follow_new: false,
            switch_delay_ms: default_switch_delay_ms(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Print raw record text instead of truncated summaries.
    #[serde(default)]
    pub raw_mode: bool,
}
