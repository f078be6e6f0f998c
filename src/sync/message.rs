//! Live sync wire protocol.
//!
//! # Incoming (`/live-sync/stream`)
//!
//! - `{"type":"notification", ...}`: message for the UI layer, never merged
//! - `{"error": ...}`: channel-level error report
//! - anything else: an update, `{html, sender}`. The server relays the
//!   outgoing payload as is, so `type` and `file` are optional.
//!
//! # Outgoing (`POST /live-sync/save`)
//!
//! `{file, html, sender}`

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SyncError;
use crate::events::Notification;

/// Message delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncMessage {
    Update {
        html: String,
        sender: String,
    },

    Notification(Notification),

    Error {
        error: String,
    },
}

impl SyncMessage {
    pub fn update(html: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::Update {
            html: html.into(),
            sender: sender.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","error":"encode"}"#.to_string())
    }

    /// Parse a push payload. Anything malformed, including a non-string
    /// `html`, is a payload error.
    pub fn from_json(s: &str) -> Result<Self, SyncError> {
        let value: Value = serde_json::from_str(s).map_err(payload_error)?;
        let Some(object) = value.as_object() else {
            return Err(SyncError::Payload("expected a JSON object".into()));
        };

        if object.get("type").and_then(Value::as_str) == Some("notification") {
            return serde_json::from_value(value)
                .map(Self::Notification)
                .map_err(payload_error);
        }

        if let Some(error) = object.get("error") {
            let error = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Self::Error { error });
        }

        let update: RelayedUpdate = serde_json::from_value(value).map_err(payload_error)?;
        Ok(Self::Update {
            html: update.html,
            sender: update.sender,
        })
    }
}

/// Update fields; extra keys (`type`, `file`) are ignored.
#[derive(Deserialize)]
struct RelayedUpdate {
    html: String,
    sender: String,
}

fn payload_error(e: serde_json::Error) -> SyncError {
    SyncError::Payload(e.to_string())
}

/// Body of `POST /live-sync/save`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPayload {
    pub file: String,
    pub html: String,
    pub sender: String,
}
