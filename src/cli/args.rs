//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// Keep an editable HTML document saved and in sync across editors
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Config file path (default: livedoc.toml)
    #[arg(short = 'C', long, global = true, default_value = "livedoc.toml", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Attach to a document: autosave, live sync and file mirroring
    #[command(visible_alias = "a")]
    Attach {
        /// HTML file to load and mirror
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,

        #[command(flatten)]
        args: AttachArgs,
    },

    /// Print the save-ready serialization of a document
    #[command(visible_alias = "s")]
    Snapshot {
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// Print the document identity for a URL path
    Id {
        /// URL path, e.g. `/docs/page.html`
        path: String,
    },
}

/// `attach` overrides for config values.
#[derive(clap::Args, Debug, Clone)]
pub struct AttachArgs {
    /// Base URL of the save and live-sync endpoints
    #[arg(short, long, value_hint = clap::ValueHint::Url)]
    pub endpoint: Option<String>,

    /// URL path of the document (drives its identity)
    #[arg(short, long)]
    pub path: Option<String>,

    /// Report saves as successful without contacting the server
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub test_mode: Option<bool>,

    /// Enable autosave
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub autosave: Option<bool>,

    /// Enable live sync
    #[arg(long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub sync: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_flags() {
        let cli = Cli::parse_from(["livedoc", "-v", "attach", "doc.html", "--autosave", "false", "-t"]);
        assert!(cli.verbose);
        let Commands::Attach { file, args } = cli.command else {
            panic!("expected attach");
        };
        assert_eq!(file, PathBuf::from("doc.html"));
        assert_eq!(args.autosave, Some(false));
        assert_eq!(args.test_mode, Some(true));
        assert_eq!(args.sync, None);
        assert_eq!(args.endpoint, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["livedoc", "id", "/docs/", "-C", "other.toml", "--color", "never"]);
        assert_eq!(cli.config, PathBuf::from("other.toml"));
        assert_eq!(cli.color, ColorChoice::Never);
        assert!(matches!(cli.command, Commands::Id { path } if path == "/docs/"));
    }
}
