//! Save Controller.
//!
//! Turns `capture_for_save` output into writes against the save endpoint.
//!
//! ```text
//!         content differs          trigger, nothing in flight
//!   Idle ─────────────────► Dirty ──────────────────────────► Saving
//!    ▲                                                          │
//!    ├──────────────── 2xx (last_saved updated) ◄───────────────┤
//!    └──── Error ◄──────── non-2xx / bad JSON ◄─────────────────┤
//!                                                               ▼
//!                                     unreachable ─────────► Offline
//! ```
//!
//! At most one save is in flight; a trigger arriving meanwhile is dropped,
//! never queued. The controller's only upward surface is the `save-*`
//! lifecycle events on the page bus.
//!
//! # Module Structure
//!
//! - `transport` - `SaveTransport` trait, HTTP and test-mode implementations
//! - `autosave` - debounced autosave policy and the unload guard

pub mod autosave;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::events::{PageEvent, SaveEvent, SaveEventKind};
use crate::snapshot::Pipeline;

pub use self::autosave::{Autosave, AutosaveOptions, UnloadDecision, check_unload};
pub use self::transport::{HttpSaveTransport, SaveError, SaveResponse, SaveTransport, TestModeTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Dirty,
    Saving,
    Error,
    Offline,
}

/// What asked for the save. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveTrigger {
    Shortcut,
    Button,
    Autosave,
    Shutdown,
}

impl SaveTrigger {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Shortcut => "shortcut",
            Self::Button => "button",
            Self::Autosave => "autosave",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Content equals the last saved content; no request was made.
    Unchanged,
    /// Another save was in flight; the trigger was dropped.
    Busy,
    Failed,
    Offline,
}

pub struct SaveController {
    pipeline: Arc<Pipeline>,
    transport: Arc<dyn SaveTransport>,
    resource: String,
    state: Mutex<SaveState>,
    last_saved: Mutex<String>,
    in_flight: AtomicBool,
    #[cfg(test)]
    transitions: Mutex<Vec<SaveState>>,
}

/// Clears the in-flight flag however the save ends.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SaveController {
    pub fn new(pipeline: Arc<Pipeline>, transport: Arc<dyn SaveTransport>, resource: &str) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            transport,
            resource: resource.to_string(),
            state: Mutex::new(SaveState::Idle),
            last_saved: Mutex::new(String::new()),
            in_flight: AtomicBool::new(false),
            #[cfg(test)]
            transitions: Mutex::new(Vec::new()),
        })
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> SaveState {
        *self.state.lock()
    }

    pub fn last_saved(&self) -> String {
        self.last_saved.lock().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Treat the current content as persisted (the page was just loaded
    /// from the server or from disk).
    pub fn mark_clean(&self) {
        *self.last_saved.lock() = self.pipeline.capture_for_save();
        self.set_state(SaveState::Idle);
    }

    /// Synchronous comparison of current content against the last save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.pipeline.capture_for_save() != *self.last_saved.lock()
    }

    /// Move Idle to Dirty when the content differs from the last save.
    pub fn check_dirty(&self) -> bool {
        let dirty = self.has_unsaved_changes();
        if dirty {
            self.enter_dirty();
        }
        dirty
    }

    fn enter_dirty(&self) {
        if self.state() == SaveState::Idle {
            self.set_state(SaveState::Dirty);
        }
    }

    /// Save the current content unless it is unchanged or a save is
    /// already running.
    pub async fn save(&self, trigger: SaveTrigger) -> SaveOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            crate::debug!("save"; "{} trigger dropped: save in flight", trigger.label());
            return SaveOutcome::Busy;
        }
        let _flight = FlightGuard(&self.in_flight);

        let html = self.pipeline.capture_for_save();
        if html == *self.last_saved.lock() {
            crate::debug!("save"; "{}: unchanged, skipping", trigger.label());
            self.set_state(SaveState::Idle);
            return SaveOutcome::Unchanged;
        }

        self.enter_dirty();
        self.set_state(SaveState::Saving);
        self.emit(SaveEventKind::Saving, "Saving…");
        crate::debug!("save"; "{}: {} ({} bytes)", trigger.label(), self.resource, html.len());

        match self.transport.save(&self.resource, &html).await {
            Ok(response) => {
                *self.last_saved.lock() = html;
                self.set_state(SaveState::Idle);
                crate::log!("save"; "{}", response.msg);
                self.emit(SaveEventKind::Saved, response.msg);
                SaveOutcome::Saved
            }
            Err(SaveError::Offline(reason)) => {
                self.set_state(SaveState::Offline);
                crate::log!("save"; "offline: {}", reason);
                self.emit(SaveEventKind::Offline, "You appear to be offline");
                SaveOutcome::Offline
            }
            Err(e) => {
                self.set_state(SaveState::Error);
                crate::log!("error"; "save failed: {}", e);
                self.emit(SaveEventKind::Error, e.user_message());
                self.set_state(SaveState::Idle);
                SaveOutcome::Failed
            }
        }
    }

    fn set_state(&self, next: SaveState) {
        let mut state = self.state.lock();
        if *state != next {
            crate::debug!("save"; "{:?} -> {:?}", *state, next);
            *state = next;
            #[cfg(test)]
            self.transitions.lock().push(next);
        }
    }

    fn emit(&self, kind: SaveEventKind, msg: impl Into<String>) {
        self.pipeline
            .page()
            .events()
            .emit(PageEvent::Save(SaveEvent::new(kind, msg)));
    }
}

#[cfg(test)]
mod tests;
