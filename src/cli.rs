use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keyward")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative API key management for identity principals", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ~/.config/keyward/config.toml)
    #[arg(long, env = "KEYWARD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(ManifestArgs),

    /// Create, replace or update keys to match the manifest
    Apply(ApplyArgs),

    /// Re-read every tracked key from the remote
    Refresh,

    /// Start tracking an existing key under a slot name
    Import {
        /// Slot name to track the key under
        slot: String,

        /// Key id: users/<user>/apiKeys/<fingerprint>
        id: String,

        /// Overwrite an existing slot
        #[arg(short, long)]
        force: bool,
    },

    /// Delete the key tracked under a slot
    Destroy {
        /// Slot name
        slot: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List a user's keys, optionally filtered
    List(ListArgs),

    /// Show tracked keys
    Show,

    /// Manage sandbox user principals
    #[command(subcommand)]
    User(UserCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply
// ============================================================================

#[derive(Args)]
pub struct ManifestArgs {
    /// Manifest describing the desired keys
    #[arg(short, long, default_value = "keyward.toml")]
    pub manifest: PathBuf,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub manifest: ManifestArgs,

    /// Number of parallel jobs (default: from config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Show the plan without applying
    #[arg(long)]
    pub dry_run: bool,
}

// ============================================================================
// List
// ============================================================================

#[derive(Args)]
pub struct ListArgs {
    /// User principal whose keys to list
    #[arg(short, long)]
    pub user: String,

    /// Filter as name=value[,value...]; repeat to AND filters
    #[arg(short, long = "filter", value_name = "NAME=VALUES")]
    pub filters: Vec<String>,

    /// Treat filter values as regular expressions
    #[arg(long)]
    pub regex: bool,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// User
// ============================================================================

#[derive(Subcommand)]
pub enum UserCommand {
    /// Register a user principal in the sandbox
    Add {
        /// User id
        id: String,
    },

    /// List sandbox users
    List,
}
