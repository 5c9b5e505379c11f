use clap::{Args, Parser, Subcommand};

use crate::remote::github::DEFAULT_API_BASE;
use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "gitsync-rs",
    version,
    about = "Mirror a local directory into a GitHub repository, splitting oversized files into parts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Disable progress bar
    #[arg(long, global = true)]
    pub no_progress_bar: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload new and changed local files
    Sync(SyncArgs),
    /// Reassemble part sets from the repository into local files
    Reconstruct(ReconstructArgs),
    /// Reconstruct part sets and download plain files
    Pull(ReconstructArgs),
    /// Recreate the repository's directory tree locally
    Structure(TransferArgs),
    /// Show cache and last-run information
    Status(StateArgs),
    /// Delete the metadata cache so the next sync re-verifies every file
    ResetState(ResetStateArgs),
}

/// Repository and connection options.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Target repository as owner/name
    #[arg(short = 'r', long, env = "GITSYNC_REPO")]
    pub repo: String,

    /// Branch to read and write (default: the repository's default branch)
    #[arg(short = 'b', long, env = "GITSYNC_BRANCH")]
    pub branch: Option<String>,

    /// Personal access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// API base URL (for GitHub Enterprise)
    #[arg(long, default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// Repository directory that mirrors the local root
    #[arg(long, default_value = "")]
    pub remote_root: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

/// Options shared by every command that moves data.
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Local root directory
    #[arg(short = 'd', long)]
    pub directory: String,

    /// Directory holding the metadata cache
    #[arg(long, default_value = "~/.gitsync-rs")]
    pub state_directory: String,

    /// Files up to this size are uploaded as one object (e.g. 40MiB)
    #[arg(long, default_value = "40MiB")]
    pub direct_limit: String,

    /// Payload bytes per part for larger files (e.g. 4MiB)
    #[arg(long, default_value = "4MiB")]
    pub part_size: String,

    /// Max retries per remote operation (0 = no retries)
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Files transferred in parallel (default: CPU count)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Parts transferred in parallel per file
    #[arg(long, default_value_t = 4)]
    pub part_concurrency: usize,

    /// Memory budget for cached blob contents (e.g. 64MiB)
    #[arg(long, default_value = "64MiB")]
    pub blob_cache: String,

    /// Run continuously, waiting N seconds between passes
    #[arg(long)]
    pub watch_with_interval: Option<u64>,

    /// Send sd_notify messages (READY, STATUS, WATCHDOG)
    #[arg(long)]
    pub notify_systemd: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Only sync files matching this glob (repeatable; default: everything)
    #[arg(long = "include")]
    pub include: Vec<String>,

    /// Skip files matching this glob (repeatable)
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ReconstructArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,

    /// Replace local files that already exist
    #[arg(long)]
    pub overwrite: bool,
}

/// Locates the metadata cache without touching the network.
#[derive(Args, Debug, Clone)]
pub struct StateArgs {
    /// Repository as owner/name
    #[arg(short = 'r', long, env = "GITSYNC_REPO")]
    pub repo: String,

    /// Branch the cache belongs to
    #[arg(short = 'b', long, env = "GITSYNC_BRANCH")]
    pub branch: Option<String>,

    /// Repository directory the cache was built against
    #[arg(long, default_value = "")]
    pub remote_root: String,

    /// Directory holding the metadata cache
    #[arg(long, default_value = "~/.gitsync-rs")]
    pub state_directory: String,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub state: StateArgs,

    /// Skip confirmation prompt
    #[arg(long)]
    pub yes: bool,
}
