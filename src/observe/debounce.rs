use std::time::Duration;

use tokio::time::Instant;

use super::ChangeRecord;

/// Trailing debounce state of one subscription.
///
/// Pure timing and buffering; the multiplexer task decides when to look.
pub(super) struct Debouncer {
    window: Duration,
    /// Buffered records (left empty for detailless subscriptions)
    pending: Vec<ChangeRecord>,
    /// Set by every matching flush, cleared on take
    last_event: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            last_event: None,
        }
    }

    /// Buffer a non-empty batch and restart the quiet period.
    pub(super) fn push(&mut self, records: Vec<ChangeRecord>) {
        self.pending.extend(records);
        self.last_event = Some(Instant::now());
    }

    pub(super) fn is_ready(&self) -> bool {
        self.last_event
            .is_some_and(|last| last.elapsed() >= self.window)
    }

    /// Take the batch once the quiet period has elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<ChangeRecord>> {
        if !self.is_ready() {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.pending))
    }

    /// Precise sleep duration until the window can next expire.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last) = self.last_event else {
            return Duration::from_secs(86400);
        };
        self.window
            .saturating_sub(last.elapsed())
            .max(Duration::from_millis(1))
    }
}
