//! The live page: one observed document, its multiplexer and event bus.
//!
//! All edits go through [`Page::mutate`], which plays the role of the
//! browser's mutation flush: raw records are drained and classified while the
//! document is still locked, and undebounced subscribers run right after the
//! lock is released so they may read or edit the page themselves. Nodes left
//! detached at the end of an edit are reclaimed.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::dom::Document;
use crate::events::EventBus;
use crate::observe::{Multiplexer, PauseGuard};

pub struct Page {
    doc: Mutex<Document>,
    mux: Multiplexer,
    events: EventBus,
}

impl Page {
    pub fn new(mut doc: Document, mux: Multiplexer, events: EventBus) -> Arc<Self> {
        doc.set_observed(true);
        doc.set_quiet_selector(Some(mux.ignore_selector().clone()));
        Arc::new(Self {
            doc: Mutex::new(doc),
            mux,
            events,
        })
    }

    /// Parse `html` into a fresh page.
    pub fn load(html: &str, mux: Multiplexer, events: EventBus) -> Result<Arc<Self>, crate::dom::DomError> {
        Ok(Self::new(Document::parse(html)?, mux, events))
    }

    /// Edit the live document and flush the resulting records.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let (result, ready) = {
            let mut doc = self.doc.lock();
            let result = f(&mut doc);
            let raw = doc.take_records();
            let ready = self.mux.flush(&doc, raw);
            doc.reclaim_detached();
            (result, ready)
        };
        for delivery in ready {
            delivery.deliver();
        }
        result
    }

    /// Read the live document.
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.doc.lock())
    }

    pub fn pause(&self) -> PauseGuard {
        self.mux.pause()
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
