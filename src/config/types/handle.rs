//! Global config handle.
//!
//! Uses `arc-swap` for lock-free reads. `main` publishes the loaded config
//! once at startup; the commands read it back through [`cfg`].

use crate::config::LiveConfig;
use arc_swap::ArcSwap;
use std::sync::{Arc, LazyLock};

/// Global config storage.
pub static CONFIG: LazyLock<ArcSwap<LiveConfig>> =
    LazyLock::new(|| ArcSwap::from_pointee(LiveConfig::default()));

#[inline]
pub fn cfg() -> Arc<LiveConfig> {
    CONFIG.load_full()
}

#[inline]
pub fn init_config(config: LiveConfig) -> Arc<LiveConfig> {
    let arc = Arc::new(config);
    CONFIG.store(Arc::clone(&arc));
    arc
}
