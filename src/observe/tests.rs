use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;

use super::*;
use crate::dom::{Document, NodeId, Selector};

fn fixture() -> (Document, NodeId, NodeId) {
    let mut doc =
        Document::parse("<div id=\"a\" data-x=\"0\"></div><div id=\"b\"></div>").unwrap();
    doc.set_observed(true);
    let body = doc.body().unwrap();
    let (a, b) = (doc.children(body)[0], doc.children(body)[1]);
    (doc, a, b)
}

/// What `Page::mutate` does after a change: take, flush, deliver.
fn flush(mux: &Multiplexer, doc: &mut Document) {
    let raw = doc.take_records();
    for delivery in mux.flush(doc, raw) {
        delivery.deliver();
    }
}

type Calls = Arc<Mutex<Vec<Vec<ChangeRecord>>>>;

fn recorder() -> (Calls, Handler) {
    let calls: Calls = Arc::default();
    let sink = Arc::clone(&calls);
    (calls, Handler::detailed(move |records| sink.lock().push(records)))
}

fn counter() -> (Arc<AtomicUsize>, Handler) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    (
        count,
        Handler::detailless(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[tokio::test(start_paused = true)]
async fn test_rapid_attribute_changes_coalesce() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, _) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(
        Channel::AttributeChange,
        handler,
        SubscribeOptions::debounce_ms(200).with_filter(Selector::parse("[data-x]").unwrap()),
    );

    for i in 1..=3 {
        doc.set_attribute(a, "data-x", &i.to_string()).unwrap();
        flush(&mux, &mut doc);
        sleep(Duration::from_millis(20)).await;
    }
    assert!(calls.lock().is_empty());

    sleep(Duration::from_millis(300)).await;
    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 3);
    assert_eq!(calls[0][2].new_value.as_deref(), Some("3"));
}

#[tokio::test(start_paused = true)]
async fn test_filter_without_matches_never_fires() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, _, b) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(
        Channel::AnyChange,
        handler,
        SubscribeOptions::debounce_ms(200).with_filter(Selector::parse("[data-x]").unwrap()),
    );

    doc.set_attribute(b, "title", "x").unwrap();
    flush(&mux, &mut doc);
    sleep(Duration::from_millis(500)).await;
    assert!(calls.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_activity_does_not_extend_window() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, b) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(
        Channel::AttributeChange,
        handler,
        SubscribeOptions::debounce_ms(200).with_filter(Selector::parse("#a").unwrap()),
    );

    doc.set_attribute(a, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    sleep(Duration::from_millis(150)).await;

    doc.set_attribute(b, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    sleep(Duration::from_millis(60)).await;

    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detailless_handler_fires_without_records() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, b) = fixture();
    let (count, handler) = counter();
    mux.subscribe(Channel::AnyChange, handler, SubscribeOptions::debounce_ms(100));

    doc.set_attribute(a, "class", "x").unwrap();
    doc.remove(b).unwrap();
    flush(&mux, &mut doc);
    sleep(Duration::from_millis(150)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_debounce_delivers_per_flush() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, _) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(Channel::AttributeChange, handler, SubscribeOptions::default());

    doc.set_attribute(a, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    doc.set_attribute(a, "data-x", "2").unwrap();
    flush(&mux, &mut doc);

    assert_eq!(calls.lock().len(), 2);
}

#[test]
fn test_channels_split_add_and_remove() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, b) = fixture();
    let (adds, add_handler) = recorder();
    let (removes, remove_handler) = recorder();
    let (both, both_handler) = recorder();
    mux.subscribe(Channel::AddElement, add_handler, SubscribeOptions::default());
    mux.subscribe(Channel::RemoveElement, remove_handler, SubscribeOptions::default());
    mux.subscribe(Channel::AddOrRemove, both_handler, SubscribeOptions::default());

    let span = doc.create_element("span");
    doc.append_child(a, span).unwrap();
    doc.remove(b).unwrap();
    doc.set_attribute(a, "class", "ignored-by-these-channels").unwrap();
    flush(&mux, &mut doc);

    assert_eq!(adds.lock()[0].len(), 1);
    assert_eq!(adds.lock()[0][0].element, span);
    assert_eq!(removes.lock()[0][0].element, b);
    assert_eq!(both.lock()[0].len(), 2);
}

#[test]
fn test_nested_pause_holds_until_last_guard() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, _) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(Channel::AnyChange, handler, SubscribeOptions::default());

    let remote = mux.pause();
    let bulk = mux.pause();
    drop(remote);
    assert!(mux.is_paused());

    doc.set_attribute(a, "data-x", "during").unwrap();
    flush(&mux, &mut doc);
    assert!(calls.lock().is_empty());

    drop(bulk);
    assert!(!mux.is_paused());

    doc.set_attribute(a, "data-x", "after").unwrap();
    flush(&mux, &mut doc);
    assert_eq!(calls.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pending_batch_waits_for_resume() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, _) = fixture();
    let (calls, handler) = recorder();
    mux.subscribe(Channel::AnyChange, handler, SubscribeOptions::debounce_ms(50));

    doc.set_attribute(a, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    let guard = mux.pause();
    sleep(Duration::from_millis(100)).await;
    assert!(calls.lock().is_empty());

    drop(guard);
    sleep(Duration::from_millis(5)).await;
    assert_eq!(calls.lock().len(), 1);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let mux = Multiplexer::new("mutations-ignore");
    let (mut doc, a, _) = fixture();
    let (calls, handler) = recorder();
    let sub = mux.subscribe(Channel::AnyChange, handler, SubscribeOptions::default());
    assert_eq!(mux.subscription_count(), 1);

    sub.unsubscribe();
    assert_eq!(mux.subscription_count(), 0);

    doc.set_attribute(a, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    assert!(calls.lock().is_empty());
}

#[test]
fn test_ignore_marker_is_configurable() {
    let mux = Multiplexer::new("data-quiet");
    let (mut doc, a, b) = fixture();
    doc.set_attribute(a, "data-quiet", "").unwrap();
    doc.take_records();
    let (calls, handler) = recorder();
    mux.subscribe(Channel::AnyChange, handler, SubscribeOptions::default());

    doc.set_attribute(a, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    assert!(calls.lock().is_empty());

    doc.set_attribute(b, "data-x", "1").unwrap();
    flush(&mux, &mut doc);
    assert_eq!(calls.lock().len(), 1);
}
