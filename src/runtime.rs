//! Coordinator: builds one live page and its services from config.
//!
//! ```text
//! LiveConfig ──► Page ──► Pipeline ──┬──► SaveController ──► Autosave
//!                                    └──► LiveSync (snapshot-ready ► send)
//! ```
//!
//! Construction is synchronous and side-effect free; [`Coordinator::start`]
//! spawns the timers and channels and must run inside a tokio runtime.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::LiveConfig;
use crate::events::{EventBus, Notifier};
use crate::observe::{Multiplexer, Subscription};
use crate::page::Page;
use crate::save::{
    Autosave, HttpSaveTransport, SaveController, SaveOutcome, SaveTransport, SaveTrigger,
    TestModeTransport, UnloadDecision, check_unload,
};
use crate::snapshot::Pipeline;
use crate::sync::{HttpSyncTransport, LiveSync, SyncTransport};

/// Transports the coordinator talks through.
pub struct Transports {
    pub save: Arc<dyn SaveTransport>,
    /// `None` disables live sync.
    pub sync: Option<Arc<dyn SyncTransport>>,
}

impl Transports {
    /// HTTP transports for the configured endpoint.
    pub fn from_config(config: &LiveConfig) -> Result<Self> {
        let save: Arc<dyn SaveTransport> = if config.save.test_mode {
            Arc::new(TestModeTransport)
        } else {
            Arc::new(
                HttpSaveTransport::new(&config.server.endpoint, config.server.timeout())
                    .context("Failed to build save client")?,
            )
        };

        let sync: Option<Arc<dyn SyncTransport>> = if config.sync.enabled {
            Some(Arc::new(
                HttpSyncTransport::new(
                    &config.server.endpoint,
                    config.server.timeout(),
                    config.sync.reconnect(),
                )
                .context("Failed to build live-sync client")?,
            ))
        } else {
            None
        };

        Ok(Self { save, sync })
    }
}

pub struct Coordinator {
    config: Arc<LiveConfig>,
    page: Arc<Page>,
    pipeline: Arc<Pipeline>,
    controller: Arc<SaveController>,
    sync: Option<LiveSync>,
    document_id: String,
    autosave: Option<Arc<Autosave>>,
    settled: Option<Subscription>,
}

impl Coordinator {
    /// Load `html` as the live page. `file` names the document when the
    /// config does not.
    pub fn new(
        html: &str,
        file: Option<&Path>,
        config: Arc<LiveConfig>,
        transports: Transports,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        let mux = Multiplexer::new(&config.observe.ignore_attr);
        let page = Page::load(html, mux, EventBus::default()).context("Failed to parse document")?;
        let pipeline = Pipeline::new(Arc::clone(&page));

        let resource = config.document.resource(file);
        let document_id = config.document.document_id(file);
        let controller = SaveController::new(Arc::clone(&pipeline), transports.save, &resource);
        // What was loaded is what the server has.
        controller.mark_clean();

        let sync = transports.sync.map(|transport| {
            let builder = LiveSync::builder(Arc::clone(&pipeline), transport, &document_id)
                .options(config.sync.options());
            match notifier {
                Some(notifier) => builder.notifier(notifier),
                None => builder,
            }
            .build()
        });

        crate::debug!("runtime"; "document `{}`, resource `{}`", document_id, resource);
        Ok(Self {
            config,
            page,
            pipeline,
            controller,
            sync,
            document_id,
            autosave: None,
            settled: None,
        })
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn controller(&self) -> &Arc<SaveController> {
        &self.controller
    }

    pub fn sync(&self) -> Option<&LiveSync> {
        self.sync.as_ref()
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Start autosave and live sync per config.
    pub fn start(&mut self) {
        if self.config.autosave.enabled {
            self.autosave = Some(Autosave::start(
                Arc::clone(&self.controller),
                self.config.autosave.options(),
            ));
        }
        if let Some(sync) = &self.sync {
            self.settled = Some(self.pipeline.watch_settled(self.config.snapshot.settle()));
            sync.start(Some(&self.document_id));
        }
        crate::log!(
            "runtime";
            "attached `{}` (autosave {}, sync {})",
            self.document_id,
            on_off(self.autosave.is_some()),
            on_off(self.sync.is_some())
        );
    }

    /// Unload path: save if dirty, push the last snapshot, stop everything.
    pub async fn shutdown(&mut self) -> Option<SaveOutcome> {
        if let Some(autosave) = self.autosave.take() {
            autosave.stop();
        }
        if let Some(settled) = self.settled.take() {
            settled.unsubscribe();
        }

        let outcome = match check_unload(&self.controller) {
            UnloadDecision::Block => Some(self.controller.save(SaveTrigger::Shutdown).await),
            UnloadDecision::Allow => None,
        };

        if let Some(sync) = &self.sync {
            if let Err(e) = sync.flush().await {
                crate::log!("sync"; "final flush failed: {}", e);
            }
            sync.stop();
        }
        outcome
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::dom::Selector;
    use crate::save::{SaveError, SaveResponse};
    use crate::sync::{ChannelEvent, PushChannel, SyncError, SyncPayload};

    #[derive(Default)]
    struct CountingSave(AtomicUsize);

    #[async_trait]
    impl SaveTransport for CountingSave {
        async fn save(&self, _resource: &str, _html: &str) -> Result<SaveResponse, SaveError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SaveResponse {
                msg: "Saved".into(),
                msg_type: "success".into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSync {
        sent: Mutex<Vec<SyncPayload>>,
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SyncTransport for RecordingSync {
        async fn send(&self, payload: &SyncPayload) -> Result<(), SyncError> {
            self.sent.lock().push(payload.clone());
            Ok(())
        }

        fn open(&self, document_id: &str) -> PushChannel {
            self.opened.lock().push(document_id.to_string());
            let (_tx, rx) = tokio::sync::mpsc::channel::<ChannelEvent>(1);
            PushChannel::new(rx, None)
        }
    }

    fn config(toml: &str) -> Arc<LiveConfig> {
        Arc::new(LiveConfig::from_str(toml).unwrap())
    }

    fn edit(coordinator: &Coordinator, text: &str) {
        coordinator
            .page()
            .mutate(|doc| {
                let p = doc.select_all(&Selector::parse("#p").unwrap())[0];
                doc.set_text_content(p, text)
            })
            .unwrap();
    }

    #[test]
    fn test_identity_from_file() {
        let save = Arc::new(CountingSave::default());
        let c = Coordinator::new(
            "<p id=\"p\">a</p>",
            Some(Path::new("/tmp/notes.html")),
            config(""),
            Transports { save, sync: None },
            None,
        )
        .unwrap();
        assert_eq!(c.document_id(), "notes");
        assert_eq!(c.controller().resource(), "notes");
        assert!(!c.controller().has_unsaved_changes());
    }

    #[tokio::test]
    async fn test_shutdown_saves_unsaved_changes_and_flushes() {
        let save = Arc::new(CountingSave::default());
        let sync = Arc::new(RecordingSync::default());
        let mut c = Coordinator::new(
            "<p id=\"p\">a</p>",
            None,
            config("[autosave]\nenabled = false\n[document]\npath = \"/docs/\""),
            Transports {
                save: save.clone(),
                sync: Some(sync.clone()),
            },
            None,
        )
        .unwrap();
        c.start();
        assert_eq!(sync.opened.lock().as_slice(), ["docs/index"]);

        edit(&c, "b");
        assert_eq!(c.shutdown().await, Some(SaveOutcome::Saved));
        assert_eq!(save.0.load(Ordering::SeqCst), 1);

        let sent = sync.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html.contains(">b<"));
        assert_eq!(sent[0].file, "docs/index");
        assert!(!c.sync().unwrap().is_running());
    }

    #[tokio::test]
    async fn test_clean_shutdown_does_not_save() {
        let save = Arc::new(CountingSave::default());
        let mut c = Coordinator::new(
            "<p id=\"p\">a</p>",
            None,
            config("[sync]\nenabled = false"),
            Transports {
                save: save.clone(),
                sync: None,
            },
            None,
        )
        .unwrap();
        c.start();
        assert_eq!(c.shutdown().await, None);
        assert_eq!(save.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transports_from_config() {
        let t = Transports::from_config(&config("[save]\ntest_mode = true\n[sync]\nenabled = false")).unwrap();
        assert!(t.sync.is_none());
        let t = Transports::from_config(&config("")).unwrap();
        assert!(t.sync.is_some());
    }
}
