//! Live Sync Engine.
//!
//! Full-duplex propagation of whole-document state between clients.
//!
//! ```text
//! SnapshotReady ──► debounce (trailing) ──► changed? ──► POST /live-sync/save
//!
//! /live-sync/stream ──► SyncMessage ─┬─ notification ──► Notifier + page event
//!                                    ├─ update, own sender ──► dropped (echo)
//!                                    └─ update, foreign ──► pause ─► parse ─►
//!                                                            reconcile ─► resume
//! ```
//!
//! Connection states: `Stopped → Connecting → Connected ⇄ Reconnecting →
//! Stopped`. Reconnection is the channel's job; the engine only reports it.
//! `start` always tears down the previous session first, and `stop` is the
//! only cancellation path.
//!
//! # Module Structure
//!
//! - `message` - wire protocol
//! - `identity` - client and document identity
//! - `sse` - server-sent events parser
//! - `transport` - `SyncTransport` trait and the HTTP implementation

pub mod identity;
pub mod message;
pub mod sse;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::dom::{Document, DomError};
use crate::events::{Notifier, PageEvent};
use crate::snapshot::Pipeline;

pub use self::identity::{ClientIdentity, document_id};
pub use self::message::{SyncMessage, SyncPayload};
pub use self::transport::{ChannelEvent, HttpSyncTransport, PushChannel, SyncTransport};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("server rejected update with status {status}")]
    Rejected { status: u16 },

    #[error("malformed payload: {0}")]
    Payload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Connecting,
    Connected,
    Reconnecting,
}

/// Merges a foreign document into the live one.
pub trait Reconciler: Send + Sync {
    fn reconcile(&self, live: &mut Document, incoming: &Document) -> Result<(), DomError>;
}

/// Default reconciler: in-place morph.
pub struct MorphReconciler;

impl Reconciler for MorphReconciler {
    fn reconcile(&self, live: &mut Document, incoming: &Document) -> Result<(), DomError> {
        crate::dom::morph(live, incoming)
    }
}

/// What became of one incoming payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Applied,
    /// Our own update echoed back.
    Echo,
    Notified,
    ChannelError(String),
    /// Malformed or unparseable; logged and dropped.
    Dropped,
}

#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Trailing debounce on outgoing snapshots.
    pub debounce: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
        }
    }
}

/// Collaborators shared with the session tasks.
struct Shared {
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn SyncTransport>,
    reconciler: Arc<dyn Reconciler>,
    notifier: Option<Arc<dyn Notifier>>,
    identity: ClientIdentity,
    opts: SyncOptions,
    state: watch::Sender<ConnectionState>,
}

/// Per-start state; rebuilt by every `start`.
struct SessionState {
    document_id: String,
    last_transmitted: Mutex<Option<String>>,
    pending: Mutex<Option<Arc<str>>>,
}

struct Session {
    state: Arc<SessionState>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct LiveSync {
    shared: Arc<Shared>,
    default_document: String,
    session: Mutex<Option<Session>>,
}

/// Builder for [`LiveSync`].
pub struct LiveSyncBuilder {
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn SyncTransport>,
    default_document: String,
    reconciler: Arc<dyn Reconciler>,
    notifier: Option<Arc<dyn Notifier>>,
    identity: ClientIdentity,
    opts: SyncOptions,
}

impl LiveSyncBuilder {
    pub fn identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn options(mut self, opts: SyncOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn build(self) -> LiveSync {
        let (state, _) = watch::channel(ConnectionState::Stopped);
        LiveSync {
            shared: Arc::new(Shared {
                pipeline: self.pipeline,
                transport: self.transport,
                reconciler: self.reconciler,
                notifier: self.notifier,
                identity: self.identity,
                opts: self.opts,
                state,
            }),
            default_document: self.default_document,
            session: Mutex::new(None),
        }
    }
}

impl LiveSync {
    /// Defaults: session identity, morph reconciler, no notifier.
    pub fn builder(
        pipeline: Arc<Pipeline>,
        transport: Arc<dyn SyncTransport>,
        default_document: &str,
    ) -> LiveSyncBuilder {
        LiveSyncBuilder {
            pipeline,
            transport,
            default_document: default_document.to_string(),
            reconciler: Arc::new(MorphReconciler),
            notifier: None,
            identity: ClientIdentity::session().clone(),
            opts: SyncOptions::default(),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.shared.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Document id of the running session.
    pub fn document_id(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.state.document_id.clone())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a session, replacing any running one.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self, document_id: Option<&str>) {
        self.stop();

        let state = Arc::new(SessionState {
            document_id: document_id.unwrap_or(&self.default_document).to_string(),
            last_transmitted: Mutex::new(None),
            pending: Mutex::new(None),
        });
        crate::log!("sync"; "connecting as {} to `{}`", self.shared.identity, state.document_id);
        self.shared.set_state(ConnectionState::Connecting);

        let channel = self.shared.transport.open(&state.document_id);
        let snapshots = self.shared.pipeline.page().events().subscribe();
        let tasks = vec![
            tokio::spawn(incoming(Arc::clone(&self.shared), channel)),
            tokio::spawn(outgoing(Arc::clone(&self.shared), Arc::clone(&state), snapshots)),
        ];

        *self.session.lock() = Some(Session { state, tasks });
    }

    /// Tear down the running session: close the channel, drop pending work.
    pub fn stop(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };
        for task in session.tasks {
            task.abort();
        }
        self.shared.set_state(ConnectionState::Stopped);
        crate::debug!("sync"; "stopped `{}`", session.state.document_id);
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    fn current(&self) -> Option<Arc<SessionState>> {
        self.session.lock().as_ref().map(|s| Arc::clone(&s.state))
    }

    // =========================================================================
    // Outgoing
    // =========================================================================

    /// Send `html` unless it equals what was last transmitted.
    /// Returns whether a request was made.
    pub async fn send_update(&self, html: &str) -> Result<bool, SyncError> {
        let Some(session) = self.current() else {
            return Ok(false);
        };
        self.shared.send_if_changed(&session, html).await
    }

    /// Send the pending snapshot now, or the current content when nothing is
    /// pending.
    pub async fn flush(&self) -> Result<bool, SyncError> {
        let Some(session) = self.current() else {
            return Ok(false);
        };
        let pending = session.pending.lock().take();
        let html = match pending {
            Some(html) => html.to_string(),
            None => self.shared.pipeline.capture_for_save(),
        };
        self.shared.send_if_changed(&session, &html).await
    }

    // =========================================================================
    // Incoming
    // =========================================================================

    /// Handle one push payload.
    pub fn handle_message(&self, raw: &str) -> Inbound {
        self.shared.handle_message(raw)
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            crate::debug!("sync"; "{:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }

    async fn send_if_changed(&self, session: &SessionState, html: &str) -> Result<bool, SyncError> {
        if session.last_transmitted.lock().as_deref() == Some(html) {
            crate::debug!("sync"; "unchanged since last transmit, skipping");
            return Ok(false);
        }

        let payload = SyncPayload {
            file: session.document_id.clone(),
            html: html.to_string(),
            sender: self.identity.to_string(),
        };
        match self.transport.send(&payload).await {
            Ok(()) => {
                *session.last_transmitted.lock() = Some(payload.html);
                crate::debug!("sync"; "sent update ({} bytes)", html.len());
                Ok(true)
            }
            Err(e) => {
                // Marker untouched: the next cycle retries the same content.
                crate::log!("sync"; "send failed: {}", e);
                Err(e)
            }
        }
    }

    fn handle_message(&self, raw: &str) -> Inbound {
        let message = match SyncMessage::from_json(raw) {
            Ok(message) => message,
            Err(e) => {
                crate::log!("sync"; "dropping message: {}", e);
                return Inbound::Dropped;
            }
        };

        match message {
            SyncMessage::Notification(notification) => {
                crate::debug!("sync"; "notification [{}] {}", notification.msg_type, notification.msg);
                if let Some(notifier) = &self.notifier {
                    notifier.notify(&notification);
                }
                self.pipeline
                    .page()
                    .events()
                    .emit(PageEvent::Notification(notification));
                Inbound::Notified
            }
            SyncMessage::Error { error } => {
                crate::log!("sync"; "channel error: {}", error);
                Inbound::ChannelError(error)
            }
            SyncMessage::Update { sender, .. } if sender == self.identity.as_str() => {
                crate::debug!("sync"; "ignoring own echo");
                Inbound::Echo
            }
            SyncMessage::Update { html, sender } => self.apply_remote(&html, sender),
        }
    }

    fn apply_remote(&self, html: &str, sender: String) -> Inbound {
        let incoming = match Document::parse(html) {
            Ok(doc) => doc,
            Err(e) => {
                crate::log!("sync"; "dropping update from {}: {}", sender, e);
                return Inbound::Dropped;
            }
        };

        let page = self.pipeline.page();
        let guard = page.pause();
        let result = page.mutate(|live| self.reconciler.reconcile(live, &incoming));
        drop(guard);

        match result {
            Ok(()) => {
                crate::log!("sync"; "applied update from {}", sender);
                page.events().emit(PageEvent::RemoteApplied { sender });
                Inbound::Applied
            }
            Err(e) => {
                crate::log!("sync"; "failed to apply update from {}: {}", sender, e);
                Inbound::Dropped
            }
        }
    }
}

/// Push channel reader.
async fn incoming(shared: Arc<Shared>, mut channel: PushChannel) {
    while let Some(event) = channel.next().await {
        match event {
            ChannelEvent::Open => {
                crate::log!("sync"; "connected");
                shared.set_state(ConnectionState::Connected);
            }
            ChannelEvent::Lost(reason) => {
                crate::log!("sync"; "connection lost: {}", reason);
                shared.set_state(ConnectionState::Reconnecting);
            }
            ChannelEvent::Message(event) => {
                shared.handle_message(&event.data);
            }
        }
    }
}

/// Trailing debounce of `SnapshotReady` followed by a send.
async fn outgoing(
    shared: Arc<Shared>,
    session: Arc<SessionState>,
    mut snapshots: broadcast::Receiver<PageEvent>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86400));
        tokio::select! {
            event = snapshots.recv() => match event {
                Ok(PageEvent::SnapshotReady { html }) => {
                    *session.pending.lock() = Some(html);
                    deadline = Some(Instant::now() + shared.opts.debounce);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    crate::debug!("sync"; "lagged {} page events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                deadline = None;
                let pending = session.pending.lock().take();
                if let Some(html) = pending {
                    let _ = shared.send_if_changed(&session, &html).await;
                }
            }
        }
    }
}
