//! Configuration management for `livedoc.toml`.
//!
//! # Module Structure
//!
//! ```text
//! config/
//! ├── section/       # Configuration section definitions
//! ├── types/         # ConfigError, global config handle
//! ├── util.rs        # Config file discovery
//! └── mod.rs         # LiveConfig (this file)
//! ```
//!
//! # Sections
//!
//! | Section        | Purpose                                          |
//! |----------------|--------------------------------------------------|
//! | `[server]`     | Save and live-sync endpoint, request timeout     |
//! | `[document]`   | URL path for identity, save resource override    |
//! | `[observe]`    | Ignore marker attribute                          |
//! | `[snapshot]`   | Snapshot-ready settle time                       |
//! | `[save]`       | Test mode                                        |
//! | `[autosave]`   | Autosave timing                                  |
//! | `[sync]`       | Live sync toggle and timing                      |
//!
//! The file is optional: without one every section takes its defaults.

pub mod section;
pub mod types;
mod util;

pub use section::{
    AutosaveConfig, DocumentConfig, ObserveConfig, SaveConfig, ServerConfig, SnapshotConfig,
    SyncConfig,
};
pub use types::{ConfigError, cfg, init_config};

use crate::cli::{AttachArgs, Cli, Commands};
use crate::log;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use util::find_config_file;

/// Root configuration structure representing livedoc.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Absolute path to the config file, if one was found (internal use only)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    pub server: ServerConfig,
    pub document: DocumentConfig,
    pub observe: ObserveConfig,
    pub snapshot: SnapshotConfig,
    pub save: SaveConfig,
    pub autosave: AutosaveConfig,
    pub sync: SyncConfig,
}

impl LiveConfig {
    /// Load configuration for the given CLI invocation.
    ///
    /// Searches upward from cwd for the config file; a missing file means
    /// defaults. Command flags are applied on top, then the result is
    /// validated.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match find_config_file(&cli.config) {
            Some(path) => {
                let mut config = Self::from_path(&path)?;
                config.config_path = Some(path);
                config
            }
            None => {
                crate::debug!("config"; "no {} found, using defaults", cli.config.display());
                Self::default()
            }
        };

        if let Commands::Attach { args, .. } = &cli.command {
            config.apply_attach_args(args);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path with unknown field detection.
    fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            Self::print_unknown_fields_warning(&ignored, path);
        }
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ConfigError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;
        Ok((config, ignored))
    }

    fn print_unknown_fields_warning(fields: &[String], path: &Path) {
        let display_path = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_else(|| path.to_string_lossy());
        log!("warning"; "unknown fields in {}, ignoring:", display_path);
        for field in fields {
            eprintln!("- {}", field);
        }
    }

    /// Apply `attach` flags over file values.
    fn apply_attach_args(&mut self, args: &AttachArgs) {
        if let Some(endpoint) = &args.endpoint {
            self.server.endpoint = endpoint.clone();
        }
        if let Some(path) = &args.path {
            self.document.path = Some(path.clone());
        }
        Self::update_option(&mut self.save.test_mode, args.test_mode.as_ref());
        Self::update_option(&mut self.autosave.enabled, args.autosave.as_ref());
        Self::update_option(&mut self.sync.enabled, args.sync.as_ref());
    }

    fn update_option<T: Clone>(target: &mut T, value: Option<&T>) {
        if let Some(v) = value {
            *target = v.clone();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.autosave.validate()?;
        Ok(())
    }
}

/// Parse a config snippet for section tests.
#[cfg(test)]
pub(crate) fn test_parse_config(content: &str) -> LiveConfig {
    LiveConfig::from_str(content).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_unknown_fields_collected() {
        let (config, mut ignored) = LiveConfig::parse_with_ignored(
            "[server]\nendpoint = \"http://localhost:8080\"\nretries = 3\n\n[colour]\nx = 1",
        )
        .unwrap();
        ignored.sort();
        assert_eq!(config.server.endpoint, "http://localhost:8080");
        assert_eq!(ignored, vec!["colour".to_string(), "server.retries".to_string()]);
    }

    #[test]
    fn test_type_error_is_toml_error() {
        assert!(matches!(
            LiveConfig::from_str("[autosave]\ndebounce_ms = \"soon\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_from_path_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            LiveConfig::from_path(&missing),
            Err(ConfigError::Io(path, _)) if path == missing
        ));
    }

    #[test]
    fn test_load_applies_attach_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("livedoc.toml");
        fs::write(&path, "[server]\nendpoint = \"http://example.com\"\n[sync]\nenabled = true\n").unwrap();

        let cli = Cli::parse_from([
            "livedoc",
            "-C",
            path.to_str().unwrap(),
            "attach",
            "page.html",
            "--endpoint",
            "https://edit.example.com",
            "--sync",
            "false",
            "--test-mode",
        ]);
        let config = LiveConfig::load(&cli).unwrap();
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
        assert_eq!(config.server.endpoint, "https://edit.example.com");
        assert!(!config.sync.enabled);
        assert!(config.save.test_mode);
        assert!(config.autosave.enabled);
    }

    #[test]
    fn test_load_rejects_invalid_endpoint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("livedoc.toml");
        fs::write(&path, "[server]\nendpoint = \"file:///tmp/x\"\n").unwrap();

        let cli = Cli::parse_from(["livedoc", "-C", path.to_str().unwrap(), "snapshot", "x.html"]);
        assert!(LiveConfig::load(&cli).is_err());
    }

    #[test]
    fn test_global_handle() {
        let mut config = LiveConfig::default();
        config.observe.ignore_attr = "data-skip".into();
        init_config(config);
        assert_eq!(cfg().observe.ignore_attr, "data-skip");
    }
}
