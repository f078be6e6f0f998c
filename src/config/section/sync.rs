//! `[sync]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [sync]
//! enabled = true
//! debounce_ms = 150       # Trailing debounce on outgoing snapshots
//! reconnect_ms = 3000     # Push channel reconnect delay (server `retry:` wins)
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sync::SyncOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub reconnect_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: SyncOptions::default().debounce.as_millis() as u64,
            reconnect_ms: 3000,
        }
    }
}

impl SyncConfig {
    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }

    pub fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}
