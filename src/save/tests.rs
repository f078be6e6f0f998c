use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::dom::Selector;
use crate::events::{EventBus, PageEvent, SaveEventKind};
use crate::observe::Multiplexer;
use crate::page::Page;

#[derive(Default)]
struct MockTransport {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
    responses: Mutex<VecDeque<Result<SaveResponse, SaveError>>>,
}

impl MockTransport {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn respond(responses: Vec<Result<SaveResponse, SaveError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn ok() -> SaveResponse {
    SaveResponse {
        msg: "Saved".into(),
        msg_type: "success".into(),
    }
}

#[async_trait]
impl SaveTransport for MockTransport {
    async fn save(&self, _resource: &str, _html: &str) -> Result<SaveResponse, SaveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| Ok(ok()))
    }
}

fn controller(transport: Arc<MockTransport>) -> Arc<SaveController> {
    let page = Page::load(
        "<p id=\"p\">a</p>",
        Multiplexer::new("mutations-ignore"),
        EventBus::default(),
    )
    .unwrap();
    let controller = SaveController::new(Pipeline::new(page), transport, "index");
    controller.mark_clean();
    controller
}

fn edit(controller: &SaveController, text: &str) {
    controller
        .pipeline()
        .page()
        .mutate(|doc| {
            let p = doc.select_all(&Selector::parse("#p").unwrap())[0];
            doc.set_text_content(p, text)
        })
        .unwrap();
}

fn save_events(rx: &mut tokio::sync::broadcast::Receiver<PageEvent>) -> Vec<(SaveEventKind, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PageEvent::Save(e) = event {
            out.push((e.kind, e.msg));
        }
    }
    out
}

#[tokio::test]
async fn test_server_error_surfaces_message() {
    let transport = MockTransport::respond(vec![Err(SaveError::Rejected {
        status: 500,
        msg: "disk full".into(),
    })]);
    let c = controller(Arc::clone(&transport));
    let mut rx = c.pipeline().page().events().subscribe();

    edit(&c, "b");
    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Failed);

    assert!(!c.is_in_flight());
    assert_eq!(c.state(), SaveState::Idle);
    assert_eq!(
        save_events(&mut rx),
        vec![
            (SaveEventKind::Saving, "Saving…".to_string()),
            (SaveEventKind::Error, "disk full".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_is_dropped_while_saving() {
    let transport = MockTransport::with_delay(Duration::from_millis(100));
    let c = controller(Arc::clone(&transport));
    edit(&c, "b");

    let (first, second) = tokio::join!(c.save(SaveTrigger::Button), c.save(SaveTrigger::Shortcut));

    assert_eq!(first, SaveOutcome::Saved);
    assert_eq!(second, SaveOutcome::Busy);
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.max_active.load(Ordering::SeqCst), 1);
    assert!(!c.is_in_flight());
}

#[tokio::test]
async fn test_unchanged_content_skips_network() {
    let transport = MockTransport::respond(Vec::new());
    let c = controller(Arc::clone(&transport));

    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Unchanged);
    edit(&c, "b");
    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Saved);
    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Unchanged);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_failed_save_is_retried_by_next_trigger() {
    let transport = MockTransport::respond(vec![Err(SaveError::Malformed("eof".into()))]);
    let c = controller(Arc::clone(&transport));
    edit(&c, "b");

    assert_eq!(c.save(SaveTrigger::Autosave).await, SaveOutcome::Failed);
    assert!(c.has_unsaved_changes());
    assert_eq!(c.save(SaveTrigger::Autosave).await, SaveOutcome::Saved);
    assert!(!c.has_unsaved_changes());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_unreachable_network_goes_offline() {
    let transport = MockTransport::respond(vec![Err(SaveError::Offline("connection refused".into()))]);
    let c = controller(Arc::clone(&transport));
    let mut rx = c.pipeline().page().events().subscribe();
    edit(&c, "b");

    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Offline);
    assert_eq!(c.state(), SaveState::Offline);
    let events = save_events(&mut rx);
    assert_eq!(events.last().map(|(k, _)| *k), Some(SaveEventKind::Offline));

    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Saved);
    assert_eq!(c.state(), SaveState::Idle);
}

#[tokio::test]
async fn test_manual_save_goes_through_dirty() {
    let c = controller(MockTransport::respond(Vec::new()));
    edit(&c, "b");
    assert_eq!(c.state(), SaveState::Idle);

    assert_eq!(c.save(SaveTrigger::Button).await, SaveOutcome::Saved);
    assert_eq!(
        *c.transitions.lock(),
        vec![SaveState::Dirty, SaveState::Saving, SaveState::Idle]
    );

    // Already dirty from a check: no second Dirty step.
    c.transitions.lock().clear();
    edit(&c, "c");
    assert!(c.check_dirty());
    assert_eq!(c.save(SaveTrigger::Shortcut).await, SaveOutcome::Saved);
    assert_eq!(
        *c.transitions.lock(),
        vec![SaveState::Dirty, SaveState::Saving, SaveState::Idle]
    );
}

#[test]
fn test_dirty_and_unload_guard() {
    let c = controller(MockTransport::respond(Vec::new()));
    assert_eq!(check_unload(&c), UnloadDecision::Allow);
    assert!(!c.check_dirty());
    assert_eq!(c.state(), SaveState::Idle);

    edit(&c, "b");
    assert!(c.check_dirty());
    assert_eq!(c.state(), SaveState::Dirty);
    assert_eq!(check_unload(&c), UnloadDecision::Block);

    c.mark_clean();
    assert_eq!(check_unload(&c), UnloadDecision::Allow);
}

#[tokio::test]
async fn test_test_mode_transport_saves() {
    let page = Page::load("<p>x</p>", Multiplexer::new("mutations-ignore"), EventBus::default()).unwrap();
    let c = SaveController::new(Pipeline::new(page), Arc::new(TestModeTransport), "index");
    assert_eq!(c.save(SaveTrigger::Shortcut).await, SaveOutcome::Saved);
    assert!(!c.has_unsaved_changes());
}

#[tokio::test(start_paused = true)]
async fn test_autosave_baseline_and_throttle() {
    let transport = MockTransport::respond(Vec::new());
    let c = controller(Arc::clone(&transport));
    let autosave = Autosave::start(Arc::clone(&c), AutosaveOptions::default());
    let ms = |n| tokio::time::sleep(Duration::from_millis(n));

    // Setup churn lands before the baseline and is never saved.
    edit(&c, "setup");
    ms(4000).await;
    assert!(autosave.baseline().is_some_and(|b| b.contains(">setup</p>")));
    assert_eq!(transport.calls(), 0);

    // A real edit is saved once its debounce expires.
    edit(&c, "user edit");
    ms(3500).await;
    assert_eq!(transport.calls(), 1);

    // The next one waits out the minimum interval.
    edit(&c, "second edit");
    ms(3500).await;
    assert_eq!(transport.calls(), 1);
    ms(1500).await;
    assert_eq!(transport.calls(), 2);

    autosave.stop();
}
