//! Snapshot Pipeline.
//!
//! Produces serializable copies of the live page without touching it:
//!
//! ```text
//! capture_snapshot:  detached clone ─► snapshot hooks
//! capture_for_save:  capture_snapshot ─► prepare hooks ─► onbeforesave
//!                    directives ─► strip [save-remove] ─► "<!DOCTYPE html>…"
//! ```
//!
//! Hooks are registered up front and run in registration order. The first
//! capture seals the pipeline; later registrations are rejected. A failing
//! hook is logged and the capture carries on with the next one.
//!
//! An [`EditorSurface`] short-circuits `capture_for_save` and returns the
//! editor's own buffer.

pub mod hooks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::dom::{Document, NodeId, Selector};
use crate::events::PageEvent;
use crate::observe::{Channel, Handler, SubscribeOptions, Subscription};
use crate::page::Page;

pub use self::hooks::{DirectiveFn, HookError, HookFn};
use self::hooks::NamedHook;

/// Elements carrying this attribute are left out of saved output.
pub const SAVE_REMOVE_ATTR: &str = "save-remove";
/// Space-separated directive names run on the saved copy.
pub const DIRECTIVE_ATTR: &str = "onbeforesave";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("cannot register `{0}`: pipeline is sealed after the first capture")]
    Sealed(String),
}

/// A rich-text editor that owns the document buffer.
pub trait EditorSurface: Send + Sync {
    /// Full document HTML as the editor currently holds it.
    fn content(&self) -> String;
}

pub struct Pipeline {
    page: Arc<Page>,
    snapshot_hooks: RwLock<Vec<NamedHook>>,
    prepare_hooks: RwLock<Vec<NamedHook>>,
    directives: RwLock<FxHashMap<String, Arc<DirectiveFn>>>,
    editor: RwLock<Option<Arc<dyn EditorSurface>>>,
    sealed: AtomicBool,
}

impl Pipeline {
    /// Pipeline with the built-in `form-state` hook and the `remove` and
    /// `empty` directives registered.
    pub fn new(page: Arc<Page>) -> Arc<Self> {
        let mut directives: FxHashMap<String, Arc<DirectiveFn>> = FxHashMap::default();
        directives.insert("remove".into(), Arc::new(hooks::directive_remove));
        directives.insert("empty".into(), Arc::new(hooks::directive_empty));

        Arc::new(Self {
            page,
            snapshot_hooks: RwLock::new(vec![NamedHook {
                name: "form-state".into(),
                run: Arc::new(hooks::form_state),
            }]),
            prepare_hooks: RwLock::new(Vec::new()),
            directives: RwLock::new(directives),
            editor: RwLock::new(None),
            sealed: AtomicBool::new(false),
        })
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    // =========================================================================
    // Registration
    // =========================================================================

    pub fn on_snapshot(
        &self,
        name: &str,
        hook: impl Fn(&mut Document) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Result<(), PipelineError> {
        self.ensure_open(name)?;
        self.snapshot_hooks.write().push(NamedHook {
            name: name.to_string(),
            run: Arc::new(hook),
        });
        Ok(())
    }

    pub fn on_prepare_for_save(
        &self,
        name: &str,
        hook: impl Fn(&mut Document) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Result<(), PipelineError> {
        self.ensure_open(name)?;
        self.prepare_hooks.write().push(NamedHook {
            name: name.to_string(),
            run: Arc::new(hook),
        });
        Ok(())
    }

    /// Register a named `onbeforesave` directive.
    pub fn register_directive(
        &self,
        name: &str,
        directive: impl Fn(&mut Document, NodeId) -> Result<(), HookError> + Send + Sync + 'static,
    ) -> Result<(), PipelineError> {
        self.ensure_open(name)?;
        self.directives
            .write()
            .insert(name.to_string(), Arc::new(directive));
        Ok(())
    }

    /// Attach or detach the editor surface. Allowed at any time.
    pub fn set_editor_surface(&self, editor: Option<Arc<dyn EditorSurface>>) {
        *self.editor.write() = editor;
    }

    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::SeqCst) {
            crate::debug!("snapshot"; "pipeline sealed with {} snapshot / {} prepare hooks",
                self.snapshot_hooks.read().len(), self.prepare_hooks.read().len());
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self, name: &str) -> Result<(), PipelineError> {
        if self.is_sealed() {
            return Err(PipelineError::Sealed(name.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Detached clone of the live document with snapshot hooks applied.
    pub fn capture_snapshot(&self) -> Document {
        self.seal();
        let mut clone = self.page.read(Document::detached_clone);
        run_hooks("snapshot", &self.snapshot_hooks.read(), &mut clone);
        clone
    }

    /// Save-ready HTML of the live document.
    pub fn capture_for_save(&self) -> String {
        let editor = self.editor.read().clone();
        if let Some(editor) = editor {
            self.seal();
            return editor.content();
        }

        let mut clone = self.capture_snapshot();
        run_hooks("prepare", &self.prepare_hooks.read(), &mut clone);
        self.run_directives(&mut clone);
        strip_excluded(&mut clone);
        clone.to_html()
    }

    fn run_directives(&self, doc: &mut Document) {
        let marker = Selector::attribute(DIRECTIVE_ATTR);
        let directives = self.directives.read();

        for id in doc.select_all(&marker) {
            let names: Vec<String> = doc
                .attr(id, DIRECTIVE_ATTR)
                .unwrap_or_default()
                .split_ascii_whitespace()
                .map(str::to_string)
                .collect();

            for name in names {
                // An earlier directive may have detached this element.
                if !doc.is_connected(id) {
                    break;
                }
                let result = match directives.get(&name) {
                    Some(directive) => directive(doc, id),
                    None => Err(HookError::UnknownDirective(name.clone())),
                };
                if let Err(e) = result {
                    crate::log!("snapshot"; "directive `{}` failed: {}", name, e);
                }
            }
        }
    }

    // =========================================================================
    // Snapshot-ready
    // =========================================================================

    /// Emit `SnapshotReady` on the page bus once local edits have been quiet
    /// for `settle`.
    pub fn watch_settled(self: &Arc<Self>, settle: Duration) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.page.multiplexer().subscribe(
            Channel::AnyChange,
            Handler::detailless(move || {
                let Some(pipeline) = weak.upgrade() else {
                    return;
                };
                let html: Arc<str> = pipeline.capture_for_save().into();
                crate::debug!("snapshot"; "ready ({} bytes)", html.len());
                pipeline.page.events().emit(PageEvent::SnapshotReady { html });
            }),
            SubscribeOptions {
                debounce: settle,
                filter: None,
            },
        )
    }
}

fn run_hooks(phase: &str, hooks: &[NamedHook], doc: &mut Document) {
    for hook in hooks {
        if let Err(e) = (hook.run)(doc) {
            crate::log!("snapshot"; "{} hook `{}` failed: {}", phase, hook.name, e);
        }
    }
}

fn strip_excluded(doc: &mut Document) {
    let marker = Selector::attribute(SAVE_REMOVE_ATTR);
    for id in doc.select_all(&marker) {
        // Nested ones already went with their ancestor.
        if doc.is_connected(id) {
            let _ = doc.remove(id);
        }
    }
}
