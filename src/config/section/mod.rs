//! Configuration section definitions.

mod document;
mod save;
mod server;
mod sync;

pub use document::{DocumentConfig, ObserveConfig};
pub use save::{AutosaveConfig, SaveConfig, SnapshotConfig};
pub use server::ServerConfig;
pub use sync::SyncConfig;
