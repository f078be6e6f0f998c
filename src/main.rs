//! livedoc - keep an editable HTML document saved and in sync.

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use livedoc::cli::{self, Cli, Commands};
use livedoc::config::{LiveConfig, init_config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    livedoc::logger::set_verbose(cli.verbose);

    init_config(LiveConfig::load(&cli)?);

    match cli.command {
        Commands::Attach { file, .. } => {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;
            rt.block_on(cli::attach::run(file))
        }
        Commands::Snapshot { file } => cli::inspect::run_snapshot(&file),
        Commands::Id { path } => {
            cli::inspect::run_id(&path);
            Ok(())
        }
    }
}
