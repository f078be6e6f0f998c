//! Save endpoint transports.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SaveError {
    /// The request never reached the server.
    #[error("network unreachable: {0}")]
    Offline(String),

    #[error("save rejected ({status}): {msg}")]
    Rejected { status: u16, msg: String },

    #[error("malformed save response: {0}")]
    Malformed(String),
}

impl SaveError {
    /// Message suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            Self::Rejected { msg, .. } => msg.clone(),
            other => other.to_string(),
        }
    }
}

/// Success body of `POST /save/<resource>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub msg: String,
    #[serde(default)]
    pub msg_type: String,
}

#[async_trait]
pub trait SaveTransport: Send + Sync {
    async fn save(&self, resource: &str, html: &str) -> Result<SaveResponse, SaveError>;
}

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// `POST <endpoint>/save/<resource>` with the document as `text/html`.
pub struct HttpSaveTransport {
    client: Client,
    endpoint: String,
}

impl HttpSaveTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, resource: &str) -> String {
        let path = resource
            .split('/')
            .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/save/{}", self.endpoint, path)
    }
}

#[async_trait]
impl SaveTransport for HttpSaveTransport {
    async fn save(&self, resource: &str, html: &str) -> Result<SaveResponse, SaveError> {
        let response = self
            .client
            .post(self.url_for(resource))
            .header(CONTENT_TYPE, "text/html; charset=utf-8")
            .body(html.to_string())
            .send()
            .await
            .map_err(|e| SaveError::Offline(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SaveError::Malformed(e.to_string()))?;

        if !status.is_success() {
            let msg = serde_json::from_str::<SaveResponse>(&body)
                .map(|r| r.msg)
                .unwrap_or_else(|_| {
                    if body.trim().is_empty() {
                        status.to_string()
                    } else {
                        body.trim().to_string()
                    }
                });
            return Err(SaveError::Rejected {
                status: status.as_u16(),
                msg,
            });
        }

        serde_json::from_str(&body).map_err(|e| SaveError::Malformed(e.to_string()))
    }
}

/// Synthesizes success without touching the network.
pub struct TestModeTransport;

#[async_trait]
impl SaveTransport for TestModeTransport {
    async fn save(&self, resource: &str, html: &str) -> Result<SaveResponse, SaveError> {
        crate::debug!("save"; "test mode: {} ({} bytes)", resource, html.len());
        Ok(SaveResponse {
            msg: "Saved (test mode)".into(),
            msg_type: "success".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_encodes_segments() {
        let transport =
            HttpSaveTransport::new("http://localhost:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.url_for("index"), "http://localhost:8080/save/index");
        assert_eq!(
            transport.url_for("docs/my page"),
            "http://localhost:8080/save/docs/my%20page"
        );
    }

    #[test]
    fn test_rejected_user_message_is_server_text() {
        let err = SaveError::Rejected {
            status: 500,
            msg: "disk full".into(),
        };
        assert_eq!(err.user_message(), "disk full");
        assert_eq!(err.to_string(), "save rejected (500): disk full");
    }

    #[test]
    fn test_response_msg_type_optional() {
        let r: SaveResponse = serde_json::from_str(r#"{"msg":"ok"}"#).unwrap();
        assert_eq!(r.msg_type, "");
    }

    #[tokio::test]
    async fn test_test_mode_synthesizes_success() {
        let r = TestModeTransport.save("index", "<html></html>").await.unwrap();
        assert_eq!(r.msg_type, "success");
    }
}
