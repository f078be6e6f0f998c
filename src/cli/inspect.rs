//! One-shot commands: `snapshot` and `id`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::{LiveConfig, cfg};
use crate::events::EventBus;
use crate::observe::Multiplexer;
use crate::page::Page;
use crate::snapshot::Pipeline;
use crate::sync::document_id;

/// Save-ready serialization of the file at `path`.
pub fn snapshot(path: &Path, config: &LiveConfig) -> Result<String> {
    let html =
        fs::read_to_string(path).with_context(|| format!("Failed to read `{}`", path.display()))?;
    let page = Page::load(
        &html,
        Multiplexer::new(&config.observe.ignore_attr),
        EventBus::default(),
    )
    .with_context(|| format!("Failed to parse `{}`", path.display()))?;
    Ok(Pipeline::new(page).capture_for_save())
}

pub fn run_snapshot(path: &Path) -> Result<()> {
    println!("{}", snapshot(path, &cfg())?);
    Ok(())
}

pub fn run_id(url_path: &str) {
    println!("{}", document_id(url_path));
}
