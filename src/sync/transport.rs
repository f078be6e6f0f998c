//! Live sync transports: the update POST and the push channel.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::SyncError;
use super::message::SyncPayload;
use super::sse::{SseEvent, SseParser};

/// What the push channel reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(SseEvent),
    /// The connection dropped; the channel reconnects on its own.
    Lost(String),
}

/// Receiving end of a push subscription. Dropping it closes the channel.
pub struct PushChannel {
    events: mpsc::Receiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    pub fn new(events: mpsc::Receiver<ChannelEvent>, task: Option<JoinHandle<()>>) -> Self {
        Self { events, task }
    }

    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// `POST /live-sync/save`.
    async fn send(&self, payload: &SyncPayload) -> Result<(), SyncError>;

    /// Subscribe to `/live-sync/stream?file=<document_id>`.
    fn open(&self, document_id: &str) -> PushChannel;
}

pub struct HttpSyncTransport {
    client: Client,
    stream_client: Client,
    endpoint: String,
    reconnect: Duration,
}

impl HttpSyncTransport {
    pub fn new(endpoint: &str, timeout: Duration, reconnect: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            // The stream stays open indefinitely; only connecting is bounded.
            stream_client: Client::builder().connect_timeout(timeout).build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            reconnect,
        })
    }

    pub fn send_url(&self) -> String {
        format!("{}/live-sync/save", self.endpoint)
    }

    pub fn stream_url(&self, document_id: &str) -> Result<url::Url, SyncError> {
        let mut url = url::Url::parse(&format!("{}/live-sync/stream", self.endpoint))
            .map_err(|e| SyncError::Network(e.to_string()))?;
        url.query_pairs_mut().append_pair("file", document_id);
        Ok(url)
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn send(&self, payload: &SyncPayload) -> Result<(), SyncError> {
        let response = self
            .client
            .post(self.send_url())
            .json(payload)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn open(&self, document_id: &str) -> PushChannel {
        let (tx, rx) = mpsc::channel(32);
        let url = self.stream_url(document_id);
        let client = self.stream_client.clone();
        let reconnect = self.reconnect;

        let task = tokio::spawn(async move {
            let url = match url {
                Ok(url) => url,
                Err(e) => {
                    let _ = tx.send(ChannelEvent::Lost(e.to_string())).await;
                    return;
                }
            };
            let mut delay = reconnect;
            loop {
                let reason = match stream_once(&client, &url, &tx, &mut delay).await {
                    Some(reason) => reason,
                    // Receiver gone: the engine stopped.
                    None => return,
                };
                if tx.send(ChannelEvent::Lost(reason)).await.is_err() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        });

        PushChannel::new(rx, Some(task))
    }
}

/// Run one connection until it ends. Returns why it ended, or `None` when
/// the receiver was dropped.
async fn stream_once(
    client: &Client,
    url: &url::Url,
    tx: &mpsc::Sender<ChannelEvent>,
    delay: &mut Duration,
) -> Option<String> {
    let mut response = match client
        .get(url.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => return Some(format!("stream returned {}", r.status())),
        Err(e) => return Some(e.to_string()),
    };

    tx.send(ChannelEvent::Open).await.ok()?;

    let mut parser = SseParser::default();
    let reason = loop {
        match response.chunk().await {
            Ok(Some(bytes)) => {
                for event in parser.feed(&bytes) {
                    tx.send(ChannelEvent::Message(event)).await.ok()?;
                }
                if let Some(retry) = parser.retry() {
                    *delay = retry;
                }
            }
            Ok(None) => break "stream closed by server".to_string(),
            Err(e) => break e.to_string(),
        }
    };
    Some(reason)
}
