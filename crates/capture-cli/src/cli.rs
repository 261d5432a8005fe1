use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "capture")]
#[command(about = "Edit project records offline and sync them with a remote authority")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for remote/actor configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Actor recorded on new revisions
    #[arg(long, global = true, value_name = "NAME")]
    pub actor: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a record
    #[command(alias = "new")]
    Create {
        /// Table the record belongs to
        #[arg(short, long, default_value = "rows")]
        table: String,
        /// JSON object payload (stdin or $EDITOR when omitted)
        payload: Option<String>,
        /// Set a single field (repeatable)
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace a record's payload
    #[command(alias = "edit")]
    Update {
        /// Record ID or unique ID prefix
        id: String,
        /// JSON object payload replacing the current one
        payload: Option<String>,
        /// Set a single field on the current payload (repeatable)
        #[arg(long = "set", value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
    },
    /// Tombstone a record
    Delete {
        /// Record ID or unique ID prefix
        id: String,
    },
    /// Show a record and its leaves
    Show {
        /// Record ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently edited records
    List {
        /// Only records of this table
        #[arg(short, long)]
        table: Option<String>,
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include tombstoned records
        #[arg(long)]
        include_deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conflicted records, or the conflict history
    Conflicts {
        /// Only records of this table
        #[arg(short, long)]
        table: Option<String>,
        /// Show every fork discovered so far instead of open conflicts
        #[arg(long)]
        history: bool,
        /// Number of history entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Settle a conflict on one of the record's competing leaves
    Resolve {
        /// Record ID or unique ID prefix
        id: String,
        /// Revision to keep
        rev: String,
        /// Replacement JSON payload for the kept revision
        #[arg(long, value_name = "JSON")]
        payload: Option<String>,
    },
    /// Exchange revisions with the remote authority
    Sync {
        /// Keep syncing on the configured interval until interrupted
        #[arg(long)]
        watch: bool,
        /// Output the cycle report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop revision bodies that only lead to confirmed tombstones
    Purge {
        /// Only records of this table
        #[arg(short, long)]
        table: Option<String>,
        /// Report candidates without removing anything
        #[arg(long)]
        dry_run: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Base URL of the remote table API
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
        /// Tables to sync (repeatable)
        #[arg(long = "table", value_name = "NAME")]
        tables: Vec<String>,
        /// Seconds between cycles of `sync --watch`
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved settings of a profile
    Show,
}
