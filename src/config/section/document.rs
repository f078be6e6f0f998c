//! `[document]` and `[observe]` section configuration.
//!
//! # Example
//!
//! ```toml
//! [document]
//! path = "/docs/guide.html"   # URL path; drives the document identity
//! resource = "guide"          # Save id override (defaults to the identity)
//!
//! [observe]
//! ignore_attr = "mutations-ignore"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::sync::document_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub path: Option<String>,
    pub resource: Option<String>,
}

impl DocumentConfig {
    /// URL path of the document: the configured one, or `/<file name>`.
    pub fn url_path(&self, file: Option<&Path>) -> String {
        if let Some(path) = &self.path {
            return path.clone();
        }
        file.and_then(Path::file_name)
            .map(|name| format!("/{}", name.to_string_lossy()))
            .unwrap_or_else(|| "/".to_string())
    }

    /// Document identity for live sync.
    pub fn document_id(&self, file: Option<&Path>) -> String {
        document_id(&self.url_path(file))
    }

    /// Resource id for the save endpoint.
    pub fn resource(&self, file: Option<&Path>) -> String {
        self.resource
            .clone()
            .unwrap_or_else(|| self.document_id(file))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserveConfig {
    /// Attribute whose subtree is invisible to subscribers.
    pub ignore_attr: String,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            ignore_attr: "mutations-ignore".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use crate::config::test_parse_config;

    #[test]
    fn test_identity_from_file_name() {
        let config = test_parse_config("");
        let file = Path::new("/srv/site/notes.html");
        assert_eq!(config.document.url_path(Some(file)), "/notes.html");
        assert_eq!(config.document.document_id(Some(file)), "notes");
        assert_eq!(config.document.resource(Some(file)), "notes");
        assert_eq!(config.document.document_id(None), "index");
    }

    #[test]
    fn test_identity_overrides() {
        let config = test_parse_config("[document]\npath = \"/docs/\"\nresource = \"handbook\"");
        let file = Path::new("ignored.html");
        assert_eq!(config.document.document_id(Some(file)), "docs/index");
        assert_eq!(config.document.resource(Some(file)), "handbook");
    }

    #[test]
    fn test_ignore_attr() {
        assert_eq!(test_parse_config("").observe.ignore_attr, "mutations-ignore");
        let config = test_parse_config("[observe]\nignore_attr = \"data-private\"");
        assert_eq!(config.observe.ignore_attr, "data-private");
    }
}
