//! Mutation Multiplexer.
//!
//! One observation point fans out into independent subscriptions. Every
//! flush of raw mutation records is classified once into [`ChangeRecord`]s;
//! each subscription then applies its own channel and selector filter and
//! its own trailing debounce.
//!
//! ```text
//! Page::mutate ──► Document records ──► Multiplexer::flush ──► classify
//!                                                   │
//!                         ┌─────────────────────────┼──────────────────┐
//!                         ▼                         ▼                  ▼
//!                 debounce 0: Delivery       debounce task       debounce task
//!                 (run after unlock)          (tokio timer)       (tokio timer)
//! ```
//!
//! Pausing is reference counted: [`Multiplexer::pause`] returns a
//! [`PauseGuard`] and observation resumes when the last guard drops.
//! Records flushed while paused are discarded.
//!
//! # Module Structure
//!
//! - `classify` - raw mutation → `ChangeRecord` expansion
//! - `debounce` - per-subscription trailing debounce state

mod classify;
mod debounce;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::dom::{Document, Mutation, NodeId, Selector};

use self::debounce::Debouncer;

// =============================================================================
// Records & channels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Remove,
    AttributeChange,
    TextChange,
}

/// One affected element of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub element: NodeId,
    pub parent: Option<NodeId>,
    pub attribute: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
}

impl ChangeRecord {
    pub fn new(kind: ChangeKind, element: NodeId) -> Self {
        Self {
            kind,
            element,
            parent: None,
            attribute: None,
            old_value: None,
            new_value: None,
            previous_sibling: None,
            next_sibling: None,
        }
    }
}

/// Subscription channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    AnyChange,
    AddOrRemove,
    AddElement,
    RemoveElement,
    AttributeChange,
}

impl Channel {
    pub fn accepts(self, kind: ChangeKind) -> bool {
        match self {
            Self::AnyChange => true,
            Self::AddOrRemove => matches!(kind, ChangeKind::Add | ChangeKind::Remove),
            Self::AddElement => kind == ChangeKind::Add,
            Self::RemoveElement => kind == ChangeKind::Remove,
            Self::AttributeChange => kind == ChangeKind::AttributeChange,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

type DetailedFn = dyn Fn(Vec<ChangeRecord>) + Send + Sync;
type DetaillessFn = dyn Fn() + Send + Sync;

/// Subscriber callback.
///
/// Detailless handlers take no arguments and rescan state themselves; their
/// subscriptions never buffer records.
#[derive(Clone)]
pub enum Handler {
    Detailed(Arc<DetailedFn>),
    Detailless(Arc<DetaillessFn>),
}

impl Handler {
    pub fn detailed(f: impl Fn(Vec<ChangeRecord>) + Send + Sync + 'static) -> Self {
        Self::Detailed(Arc::new(f))
    }

    pub fn detailless(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self::Detailless(Arc::new(f))
    }

    pub fn is_detailless(&self) -> bool {
        matches!(self, Self::Detailless(_))
    }

    fn call(&self, records: Vec<ChangeRecord>) {
        match self {
            Self::Detailed(f) => f(records),
            Self::Detailless(f) => f(),
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_detailless() {
            "Handler::Detailless"
        } else {
            "Handler::Detailed"
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Trailing debounce window; zero delivers at the end of the flush.
    pub debounce: Duration,
    /// Only records whose element matches are delivered.
    pub filter: Option<Selector>,
}

impl SubscribeOptions {
    pub fn debounce_ms(ms: u64) -> Self {
        Self {
            debounce: Duration::from_millis(ms),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Selector) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A batch ready to run outside the document lock.
#[must_use = "deliveries must be run after the document lock is released"]
pub struct Delivery {
    handler: Handler,
    records: Vec<ChangeRecord>,
}

impl Delivery {
    pub fn deliver(self) {
        self.handler.call(self.records);
    }
}

// =============================================================================
// Pause
// =============================================================================

#[derive(Default)]
struct PauseState {
    count: AtomicUsize,
    resumed: Notify,
}

impl PauseState {
    fn is_paused(&self) -> bool {
        self.count.load(Ordering::SeqCst) > 0
    }
}

/// Keeps the multiplexer paused until dropped.
#[must_use = "observation resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    state: Arc<PauseState>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if self.state.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.resumed.notify_waiters();
        }
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

struct Entry {
    channel: Channel,
    handler: Handler,
    filter: Option<Selector>,
    timer: Option<Timer>,
}

struct Timer {
    debouncer: Arc<Mutex<Debouncer>>,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

struct Inner {
    subs: Mutex<BTreeMap<u64, Entry>>,
    next_id: AtomicU64,
    pause: Arc<PauseState>,
    ignore: Selector,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for entry in self.subs.get_mut().values() {
            if let Some(timer) = &entry.timer {
                timer.task.abort();
            }
        }
    }
}

/// Shared observation point. Cheap to clone.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<Inner>,
}

impl Multiplexer {
    /// Create a multiplexer that drops records under `[ignore_attr]`.
    pub fn new(ignore_attr: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                subs: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                pause: Arc::new(PauseState::default()),
                ignore: Selector::attribute(ignore_attr),
            }),
        }
    }

    /// Register a handler on a channel.
    ///
    /// Debounced subscriptions spawn a timer task, so they must be created
    /// inside a tokio runtime.
    pub fn subscribe(&self, channel: Channel, handler: Handler, opts: SubscribeOptions) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let timer = (!opts.debounce.is_zero()).then(|| {
            let debouncer = Arc::new(Mutex::new(Debouncer::new(opts.debounce)));
            let wake = Arc::new(Notify::new());
            let task = tokio::spawn(run_timer(
                Arc::clone(&debouncer),
                Arc::clone(&wake),
                Arc::clone(&self.inner.pause),
                handler.clone(),
            ));
            Timer { debouncer, wake, task }
        });

        crate::debug!("observe"; "subscribe #{} {:?} debounce={:?} filter={:?}",
            id, channel, opts.debounce, opts.filter.as_ref().map(Selector::as_str));

        self.inner.subs.lock().insert(
            id,
            Entry {
                channel,
                handler,
                filter: opts.filter,
                timer,
            },
        );

        Subscription {
            id,
            mux: Arc::downgrade(&self.inner),
        }
    }

    /// Suppress all channels until the returned guard (and every other
    /// outstanding guard) is dropped.
    pub fn pause(&self) -> PauseGuard {
        self.inner.pause.count.fetch_add(1, Ordering::SeqCst);
        PauseGuard {
            state: Arc::clone(&self.inner.pause),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.pause.is_paused()
    }

    /// Subtrees matching this never produce records.
    pub fn ignore_selector(&self) -> &Selector {
        &self.inner.ignore
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subs.lock().len()
    }

    /// Classify one flush and route it to every subscription.
    ///
    /// Debounced subscriptions buffer their share; undebounced ones come
    /// back as [`Delivery`]s for the caller to run once it no longer holds
    /// the document.
    pub fn flush(&self, doc: &Document, raw: Vec<Mutation>) -> Vec<Delivery> {
        if raw.is_empty() {
            return Vec::new();
        }
        if self.is_paused() {
            crate::debug!("observe"; "paused, dropping {} raw records", raw.len());
            return Vec::new();
        }

        let records = classify::classify(doc, &raw, &self.inner.ignore);
        if records.is_empty() {
            return Vec::new();
        }

        let mut ready = Vec::new();
        let subs = self.inner.subs.lock();
        for entry in subs.values() {
            let matching: Vec<ChangeRecord> = records
                .iter()
                .filter(|r| entry.channel.accepts(r.kind))
                .filter(|r| entry.filter.as_ref().is_none_or(|sel| doc.matches(r.element, sel)))
                .cloned()
                .collect();
            // No matching activity: no delivery and no window reset.
            if matching.is_empty() {
                continue;
            }
            let batch = if entry.handler.is_detailless() {
                Vec::new()
            } else {
                matching
            };
            match &entry.timer {
                Some(timer) => {
                    timer.debouncer.lock().push(batch);
                    timer.wake.notify_one();
                }
                None => ready.push(Delivery {
                    handler: entry.handler.clone(),
                    records: batch,
                }),
            }
        }
        ready
    }
}

/// Drive one subscription's trailing debounce.
async fn run_timer(
    debouncer: Arc<Mutex<Debouncer>>,
    wake: Arc<Notify>,
    pause: Arc<PauseState>,
    handler: Handler,
) {
    loop {
        let sleep = debouncer.lock().sleep_duration();
        tokio::select! {
            _ = wake.notified() => continue,
            _ = tokio::time::sleep(sleep) => {}
        }

        if pause.is_paused() {
            let resumed = pause.resumed.notified();
            if pause.is_paused() {
                resumed.await;
            }
            continue;
        }

        let batch = debouncer.lock().take_if_ready();
        if let Some(batch) = batch {
            handler.call(batch);
        }
    }
}

/// Handle returned by [`Multiplexer::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    mux: std::sync::Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(inner) = self.mux.upgrade() else {
            return;
        };
        if let Some(entry) = inner.subs.lock().remove(&self.id) {
            if let Some(timer) = entry.timer {
                timer.task.abort();
            }
            crate::debug!("observe"; "unsubscribe #{}", self.id);
        }
    }
}

#[cfg(test)]
mod tests;
