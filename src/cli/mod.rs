//! Command-line interface module.

mod args;
pub mod attach;
pub mod inspect;

pub use args::{AttachArgs, Cli, Commands};
