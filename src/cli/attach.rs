//! `livedoc attach`: keep a file-backed document live.
//!
//! ```text
//! file edit ──► watcher ──► morph into page ──► autosave / live sync
//! remote update ──► page ──► RemoteApplied ──► write file
//! Ctrl+C ──► unload guard ──► save ──► flush ──► stop
//! ```
//!
//! The file mirror remembers what it last read or wrote so the watcher does
//! not bounce our own writes back into the page.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::config::cfg;
use crate::dom::{Document, morph};
use crate::events::{Notification, Notifier, PageEvent, SaveEvent, SaveEventKind};
use crate::logger::{status_error, status_pending, status_pin, status_success, status_warning};
use crate::page::Page;
use crate::runtime::{Coordinator, Transports};
use crate::save::SaveOutcome;
use crate::snapshot::Pipeline;
use crate::{debug, log};

/// Editors write in bursts (truncate, write, rename); wait for quiet.
const WATCH_SETTLE: Duration = Duration::from_millis(80);

pub async fn run(file: PathBuf) -> Result<()> {
    let config = cfg();
    let html = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read `{}`", file.display()))?;

    let transports = Transports::from_config(&config)?;
    let mut coordinator = Coordinator::new(
        &html,
        Some(file.as_path()),
        config,
        transports,
        Some(Arc::new(StatusNotifier)),
    )?;

    let mirror = Arc::new(FileMirror::new(file.clone(), html));
    let renderer = tokio::spawn(render_events(
        coordinator.page().events().subscribe(),
        Arc::clone(coordinator.pipeline()),
        Arc::clone(&mirror),
    ));

    coordinator.start();

    let (_watcher, mut changes) = watch_file(&file)
        .with_context(|| format!("Failed to watch `{}`", file.display()))?;
    let mut shutdown = shutdown_signal()?;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(()) = changes.recv() => {
                tokio::time::sleep(WATCH_SETTLE).await;
                while changes.try_recv().is_ok() {}
                pick_up_file_edit(&mirror, coordinator.page());
            }
        }
    }

    log!("attach"; "shutting down...");
    match coordinator.shutdown().await {
        Some(SaveOutcome::Saved) | None => {}
        Some(outcome) => log!("save"; "final save ended as {:?}", outcome),
    }
    renderer.abort();
    Ok(())
}

/// Morph the file's current content into the page, if it changed.
fn pick_up_file_edit(mirror: &FileMirror, page: &Page) {
    match mirror.changed() {
        Ok(Some(html)) => {
            if let Err(e) = apply_local_edit(page, &html) {
                log!("watch"; "ignoring edit: {}", e);
            } else {
                debug!("watch"; "merged file edit ({} bytes)", html.len());
            }
        }
        Ok(None) => {}
        Err(e) => log!("watch"; "{:#}", e),
    }
}

/// Apply new file content as a local edit: observed, so autosave and live
/// sync pick it up.
pub fn apply_local_edit(page: &Page, html: &str) -> Result<()> {
    let incoming = Document::parse(html)?;
    page.mutate(|live| morph(live, &incoming))?;
    Ok(())
}

// =============================================================================
// File mirror
// =============================================================================

pub struct FileMirror {
    path: PathBuf,
    known: Mutex<String>,
}

impl FileMirror {
    pub fn new(path: PathBuf, content: String) -> Self {
        Self {
            path,
            known: Mutex::new(content),
        }
    }

    /// Read the file; `Some` when it differs from what we last saw.
    pub fn changed(&self) -> Result<Option<String>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read `{}`", self.path.display()))?;
        let mut known = self.known.lock();
        if *known == content {
            return Ok(None);
        }
        *known = content.clone();
        Ok(Some(content))
    }

    /// Write `html` unless the file already holds it. Returns whether it wrote.
    pub fn write(&self, html: &str) -> Result<bool> {
        let mut known = self.known.lock();
        if *known == html {
            return Ok(false);
        }
        fs::write(&self.path, html)
            .with_context(|| format!("Failed to write `{}`", self.path.display()))?;
        *known = html.to_string();
        Ok(true)
    }
}

// =============================================================================
// Terminal UI
// =============================================================================

/// Renders server notifications on the status line.
pub struct StatusNotifier;

impl Notifier for StatusNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.msg_type.as_str() {
            "error" => status_error(&notification.msg, ""),
            "warning" => status_warning(&notification.msg),
            _ => status_success(&notification.msg),
        }
        if notification.persistent == Some(true) {
            status_pin();
        }
    }
}

fn render_save_event(event: &SaveEvent) {
    match event.kind {
        SaveEventKind::Saving => status_pending(&event.msg),
        SaveEventKind::Saved => status_success(&event.msg),
        SaveEventKind::Error => status_error("save failed", &event.msg),
        SaveEventKind::Offline => status_warning(&event.msg),
    }
}

async fn render_events(
    mut events: broadcast::Receiver<PageEvent>,
    pipeline: Arc<Pipeline>,
    mirror: Arc<FileMirror>,
) {
    loop {
        match events.recv().await {
            Ok(PageEvent::Save(event)) => render_save_event(&event),
            Ok(PageEvent::RemoteApplied { sender }) => {
                match mirror.write(&pipeline.capture_for_save()) {
                    Ok(true) => log!("sync"; "update from {} written to disk", sender),
                    Ok(false) => {}
                    Err(e) => log!("sync"; "{:#}", e),
                }
            }
            // Notifications go through the notifier; snapshots to live sync.
            Ok(PageEvent::Notification(_) | PageEvent::SnapshotReady { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("attach"; "status lagged {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

// =============================================================================
// Watcher and shutdown bridges
// =============================================================================

/// Watch the file's directory (editors often replace the file) and report
/// events that touch it.
fn watch_file(path: &Path) -> notify::Result<(RecommendedWatcher, mpsc::Receiver<()>)> {
    let (notify_tx, notify_rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    })?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    let name = path.file_name().map(|n| n.to_os_string());
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        while let Ok(result) = notify_rx.recv() {
            match result {
                Ok(event) => {
                    if matches!(event.kind, notify::EventKind::Access(_)) {
                        continue;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == name);
                    if ours && tx.blocking_send(()).is_err() {
                        break;
                    }
                }
                Err(e) => log!("watch"; "notify error: {}", e),
            }
        }
    });

    Ok((watcher, rx))
}

/// Resolves on the first Ctrl+C.
fn shutdown_signal() -> Result<tokio::task::JoinHandle<()>> {
    let (tx, rx) = crossbeam::channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))?;

    Ok(tokio::task::spawn_blocking(move || {
        let _ = rx.recv();
    }))
}
