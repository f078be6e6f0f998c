//! Autosave policy and the unsaved-changes guard.
//!
//! Autosave listens for any change (detailless, multi-second debounce) and
//! rescans the page when edits go quiet. It saves only when the content
//! differs from both the post-load baseline and the last saved content, and
//! never more often than `min_interval`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{SaveController, SaveOutcome, SaveTrigger};
use crate::observe::{Channel, Handler, SubscribeOptions, Subscription};

#[derive(Debug, Clone, Copy)]
pub struct AutosaveOptions {
    pub debounce: Duration,
    /// Delay before the baseline is captured, absorbing setup-time churn.
    pub baseline_delay: Duration,
    /// Minimum spacing between two autosave requests.
    pub min_interval: Duration,
}

impl Default for AutosaveOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(3000),
            baseline_delay: Duration::from_millis(1500),
            min_interval: Duration::from_millis(5000),
        }
    }
}

pub struct Autosave {
    controller: Arc<SaveController>,
    opts: AutosaveOptions,
    baseline: Mutex<Option<String>>,
    last_attempt: Mutex<Option<Instant>>,
    /// A run is scheduled or sleeping out the throttle.
    scheduled: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    baseline_task: Mutex<Option<JoinHandle<()>>>,
}

impl Autosave {
    /// Subscribe to the page and schedule the baseline capture.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(controller: Arc<SaveController>, opts: AutosaveOptions) -> Arc<Self> {
        let this = Arc::new(Self {
            controller,
            opts,
            baseline: Mutex::new(None),
            last_attempt: Mutex::new(None),
            scheduled: AtomicBool::new(false),
            subscription: Mutex::new(None),
            baseline_task: Mutex::new(None),
        });

        let weak = Arc::downgrade(&this);
        let task = tokio::spawn(async move {
            tokio::time::sleep(opts.baseline_delay).await;
            if let Some(this) = weak.upgrade() {
                let html = this.controller.pipeline().capture_for_save();
                crate::debug!("autosave"; "baseline captured ({} bytes)", html.len());
                *this.baseline.lock() = Some(html);
            }
        });
        *this.baseline_task.lock() = Some(task);

        let weak: Weak<Self> = Arc::downgrade(&this);
        let subscription = this.controller.pipeline().page().multiplexer().subscribe(
            Channel::AnyChange,
            Handler::detailless(move || {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                if this.scheduled.swap(true, Ordering::SeqCst) {
                    return;
                }
                tokio::spawn(async move {
                    this.run().await;
                    this.scheduled.store(false, Ordering::SeqCst);
                });
            }),
            SubscribeOptions {
                debounce: opts.debounce,
                filter: None,
            },
        );
        *this.subscription.lock() = Some(subscription);

        this
    }

    /// One autosave pass. `None` when no save was attempted.
    pub async fn run(&self) -> Option<SaveOutcome> {
        let current = self.controller.pipeline().capture_for_save();

        let Some(baseline) = self.baseline.lock().clone() else {
            crate::debug!("autosave"; "skipped: baseline not captured yet");
            return None;
        };
        if current == baseline {
            crate::debug!("autosave"; "skipped: content equals baseline");
            return None;
        }
        if current == self.controller.last_saved() {
            crate::debug!("autosave"; "skipped: content already saved");
            return None;
        }
        self.controller.check_dirty();

        let last_attempt = *self.last_attempt.lock();
        let wait = last_attempt
            .map(|at| self.opts.min_interval.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO);
        if !wait.is_zero() {
            crate::debug!("autosave"; "throttled for {:?}", wait);
            tokio::time::sleep(wait).await;
        }

        *self.last_attempt.lock() = Some(Instant::now());
        Some(self.controller.save(SaveTrigger::Autosave).await)
    }

    pub fn baseline(&self) -> Option<String> {
        self.baseline.lock().clone()
    }

    pub fn stop(&self) {
        if let Some(sub) = self.subscription.lock().take() {
            sub.unsubscribe();
        }
        if let Some(task) = self.baseline_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Autosave {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDecision {
    Allow,
    /// Unsaved changes: ask before leaving.
    Block,
}

/// Navigation-time check: one comparison against the last saved content.
pub fn check_unload(controller: &SaveController) -> UnloadDecision {
    if controller.has_unsaved_changes() {
        UnloadDecision::Block
    } else {
        UnloadDecision::Allow
    }
}
