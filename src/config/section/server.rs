//! `[server]` section configuration.
//!
//! Where the save and live-sync endpoints live.
//!
//! # Example
//!
//! ```toml
//! [server]
//! endpoint = "http://127.0.0.1:5000"   # Base URL for /save and /live-sync
//! timeout_ms = 10000                   # Request timeout
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL; must be http or https.
    pub endpoint: String,

    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| ConfigError::invalid("server.endpoint", format!("`{}`: {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "server.endpoint",
                format!("scheme must be http or https, got `{}`", url.scheme()),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("server.timeout_ms", "must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::test_parse_config;

    #[test]
    fn test_server_defaults() {
        let config = test_parse_config("");
        assert_eq!(config.server.endpoint, "http://127.0.0.1:5000");
        assert_eq!(config.server.timeout().as_secs(), 10);
        assert!(config.server.validate().is_ok());
    }

    #[test]
    fn test_server_rejects_non_http_endpoint() {
        let config = test_parse_config("[server]\nendpoint = \"ftp://example.com\"");
        assert!(config.server.validate().is_err());

        let config = test_parse_config("[server]\nendpoint = \"not a url\"");
        assert!(config.server.validate().is_err());

        let config = test_parse_config("[server]\nendpoint = \"https://docs.example.com/edit\"");
        assert!(config.server.validate().is_ok());
    }
}
