//! Page-level event bus.
//!
//! The save controller, snapshot pipeline and live sync engine publish here;
//! the UI layer (the terminal status line in the CLI) subscribes. Events are
//! fire-and-forget: with no receiver attached they are dropped.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Save lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveEventKind {
    Saving,
    Saved,
    Error,
    Offline,
}

impl SaveEventKind {
    /// Event name as seen by notification consumers.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Saving => "save-saving",
            Self::Saved => "save-saved",
            Self::Error => "save-error",
            Self::Offline => "save-offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveEvent {
    pub kind: SaveEventKind,
    pub msg: String,
    pub timestamp: u64,
}

impl SaveEvent {
    pub fn new(kind: SaveEventKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            timestamp: now_millis(),
        }
    }
}

/// Server-originated notification, also used for save responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub msg_type: String,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent: Option<bool>,
}

/// UI layer that displays notifications (toast, status line).
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Save(SaveEvent),
    /// Document-level `notification` event.
    Notification(Notification),
    /// Local edits settled; `html` is the save-ready serialization.
    SnapshotReady { html: Arc<str> },
    /// A foreign update was merged into the live document.
    RemoteApplied { sender: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PageEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: PageEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PageEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_event_names() {
        assert_eq!(SaveEventKind::Saving.name(), "save-saving");
        assert_eq!(SaveEventKind::Offline.name(), "save-offline");
    }

    #[test]
    fn test_notification_wire_names() {
        let n: Notification =
            serde_json::from_str(r#"{"msgType":"info","msg":"hello","persistent":true}"#).unwrap();
        assert_eq!(n.msg_type, "info");
        assert_eq!(n.action, None);
        assert_eq!(n.persistent, Some(true));
        assert_eq!(
            serde_json::to_string(&n).unwrap(),
            r#"{"msgType":"info","msg":"hello","persistent":true}"#
        );
    }

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(PageEvent::RemoteApplied { sender: "a".into() });
        assert_eq!(rx.recv().await.unwrap(), PageEvent::RemoteApplied { sender: "a".into() });

        // No receivers: silently dropped.
        drop(rx);
        bus.emit(PageEvent::RemoteApplied { sender: "b".into() });
    }
}
