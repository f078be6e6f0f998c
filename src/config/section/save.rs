//! `[snapshot]`, `[save]` and `[autosave]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [snapshot]
//! settle_ms = 100            # Quiet time before a snapshot is considered ready
//!
//! [save]
//! test_mode = false          # Synthesize success without a network call
//!
//! [autosave]
//! enabled = true
//! debounce_ms = 3000
//! baseline_delay_ms = 1500
//! min_interval_ms = 5000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::save::AutosaveOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub settle_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { settle_ms: 100 }
    }
}

impl SnapshotConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveConfig {
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    pub enabled: bool,
    pub debounce_ms: u64,
    pub baseline_delay_ms: u64,
    pub min_interval_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        let opts = AutosaveOptions::default();
        Self {
            enabled: true,
            debounce_ms: opts.debounce.as_millis() as u64,
            baseline_delay_ms: opts.baseline_delay.as_millis() as u64,
            min_interval_ms: opts.min_interval.as_millis() as u64,
        }
    }
}

impl AutosaveConfig {
    pub fn options(&self) -> AutosaveOptions {
        AutosaveOptions {
            debounce: Duration::from_millis(self.debounce_ms),
            baseline_delay: Duration::from_millis(self.baseline_delay_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.debounce_ms == 0 {
            return Err(ConfigError::invalid(
                "autosave.debounce_ms",
                "must be greater than 0 when autosave is enabled",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::test_parse_config;

    #[test]
    fn test_autosave_defaults_match_engine() {
        let config = test_parse_config("");
        let opts = config.autosave.options();
        assert!(config.autosave.enabled);
        assert_eq!(opts.debounce, Duration::from_millis(3000));
        assert_eq!(opts.baseline_delay, Duration::from_millis(1500));
        assert_eq!(opts.min_interval, Duration::from_millis(5000));
        assert_eq!(config.snapshot.settle(), Duration::from_millis(100));
        assert!(!config.save.test_mode);
    }

    #[test]
    fn test_autosave_zero_debounce_rejected() {
        let config = test_parse_config("[autosave]\ndebounce_ms = 0");
        assert!(config.autosave.validate().is_err());

        // Irrelevant when autosave is off.
        let config = test_parse_config("[autosave]\nenabled = false\ndebounce_ms = 0");
        assert!(config.autosave.validate().is_ok());
    }

    #[test]
    fn test_partial_override() {
        let config = test_parse_config("[autosave]\nmin_interval_ms = 0");
        assert_eq!(config.autosave.min_interval_ms, 0);
        assert_eq!(config.autosave.debounce_ms, 3000);
    }
}
