// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bridge configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Result, TetherError};

/// What the lifecycle monitor does when its signal queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the oldest queued signal to make room (its handle stays live).
    DropOldest,
    /// Stop emitting; unreported objects are picked up by a later sweep.
    Backpressure,
}

/// Tunables for one bridge instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Number of independently locked slot groups in the handle table.
    pub handle_shards: usize,
    /// Upper bound on simultaneously live handles.
    pub max_handles: u32,
    /// Capacity of the collection-signal queue.
    pub signal_queue_capacity: usize,
    /// Behaviour when the signal queue is full.
    pub overflow_policy: OverflowPolicy,
    /// How often a blocked `drain_signals` re-sweeps for finalised objects.
    pub drain_poll_interval_ms: u64,
    /// Default bound applied to proxy calls; `None` waits indefinitely.
    pub foreign_call_timeout_ms: Option<u64>,
    /// Worker threads of the in-process loopback runtime.
    pub loopback_worker_threads: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            handle_shards: 8,
            max_handles: 1 << 20,
            signal_queue_capacity: 1024,
            overflow_policy: OverflowPolicy::Backpressure,
            drain_poll_interval_ms: 5,
            foreign_call_timeout_ms: None,
            loopback_worker_threads: 2,
        }
    }
}

impl BridgeConfig {
    /// Reject settings the bridge cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.handle_shards == 0 {
            return Err(TetherError::Config("handle_shards must be at least 1".into()));
        }
        if self.max_handles == 0 || self.max_handles == u32::MAX {
            return Err(TetherError::Config(format!(
                "max_handles must be in 1..{}",
                u32::MAX
            )));
        }
        if self.signal_queue_capacity == 0 {
            return Err(TetherError::Config(
                "signal_queue_capacity must be at least 1".into(),
            ));
        }
        if self.drain_poll_interval_ms == 0 {
            return Err(TetherError::Config(
                "drain_poll_interval_ms must be at least 1".into(),
            ));
        }
        if self.loopback_worker_threads == 0 {
            return Err(TetherError::Config(
                "loopback_worker_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn foreign_call_timeout(&self) -> Option<Duration> {
        self.foreign_call_timeout_ms.map(Duration::from_millis)
    }

    /// Load a JSON config file. Missing keys take their defaults.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!(?config, "bridge config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
