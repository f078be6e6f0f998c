//! livedoc: the synchronization core for a directly editable HTML document.
//!
//! A live [`page::Page`] is observed through one [`observe::Multiplexer`];
//! the [`snapshot::Pipeline`] turns it into save-ready HTML; the
//! [`save::SaveController`] persists it and the [`sync::LiveSync`] engine
//! exchanges it with other editors. [`runtime::Coordinator`] wires them
//! together from a [`config::LiveConfig`].

pub mod logger;

pub mod cli;
pub mod config;
pub mod dom;
pub mod events;
pub mod observe;
pub mod page;
pub mod runtime;
pub mod save;
pub mod snapshot;
pub mod sync;
