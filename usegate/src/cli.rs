//! Command-line types for `usegate`.
//!
//! Defined apart from `main.rs` so tests can parse and run commands without
//! spawning the binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Manage the use-case allowlist file shared with the proxy.
#[derive(Parser, Debug)]
#[command(name = "usegate", version)]
pub struct Cli {
    /// Allowlist file (default: $USEGATE_CONFIG, then ./config.yaml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List all allowed use cases.
    List,
    /// Add a use case.
    Add(AddArgs),
    /// Remove a use case.
    Remove {
        /// Use case ID to remove.
        use_case_id: String,
    },
    /// Check whether a use case ID is allowed (exit 1 if not).
    Validate {
        /// Use case ID to check.
        use_case_id: String,
    },
    /// Print the whole configuration file.
    Show,
    /// Restore the built-in allowlist and security settings.
    Reset {
        /// Skip the confirmation prompt.
        #[arg(long, short)]
        yes: bool,
    },
    /// Add use cases from a file (one per line, `ID` or `ID:Description`).
    BulkAdd {
        /// File to import.
        file_path: PathBuf,
    },
    /// Write all use cases to a file in the bulk format.
    Export {
        /// Destination file.
        file_path: PathBuf,
    },
    /// List backups of the configuration file, oldest first.
    Backups,
}

/// Arguments for `usegate add`.
#[derive(Args, Debug, PartialEq, Eq)]
pub struct AddArgs {
    /// Use case ID to add.
    pub use_case_id: String,

    /// Optional description.
    #[arg(long, short)]
    pub description: Option<String>,
}
