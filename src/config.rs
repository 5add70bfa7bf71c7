//! Settings for the processing server and its envelopes.
//!
//! All structs deserialize with `#[serde(default)]` so hosts can override
//! only the fields they care about in a TOML config file.

use serde::Deserialize;
use std::time::Duration;

/// Retry envelope settings applied to every background process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum executions of a failing process before the error escapes
    /// the envelope.
    pub max_attempts: u32,
    /// Cap applied to every computed backoff delay, in seconds.
    pub max_delay_secs: u64,
}

impl RetrySettings {
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            max_delay_secs: 300,
        }
    }
}

/// Settings for a processing server instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Grace period between the stop request and escalated cancellation,
    /// in milliseconds.
    pub stop_timeout_millis: u64,
    /// Time after the stop request at which the server abandons waiting
    /// for its processes, in milliseconds.
    pub shutdown_timeout_millis: u64,
    /// Extra wait granted to `wait_for_shutdown` beyond the shutdown
    /// deadline, in milliseconds.
    pub last_chance_timeout_millis: u64,
    /// Pause before restarting a crashed supervisor or process loop,
    /// in milliseconds.
    pub restart_delay_millis: u64,
    /// Interval between storage heartbeats, in milliseconds.
    pub heartbeat_interval_millis: u64,
    /// Retry envelope applied to every process.
    pub retry: RetrySettings,
}

impl ServerSettings {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_millis)
    }

    pub fn last_chance_timeout(&self) -> Duration {
        Duration::from_millis(self.last_chance_timeout_millis)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_millis)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_millis)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stop_timeout_millis: 1_000,
            shutdown_timeout_millis: 15_000,
            last_chance_timeout_millis: 2_000,
            restart_delay_millis: 15_000,
            heartbeat_interval_millis: 30_000,
            retry: RetrySettings::default(),
        }
    }
}
