use crate::build_info;
use crate::commands::{DaemonArgs, SyncArgs};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Media catalog sync for Xtream panels and chat-history backends",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long = "log-level", default_value = "info", global = true)]
    pub log_level: String,

    #[arg(long = "db-path", global = true)]
    /// Overrides CATALOG_DB_PATH
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync for the selected sources and exit
    Sync(SyncArgs),
    /// Schedule periodic syncs and serve health, metrics and sync-now endpoints
    Daemon(DaemonArgs),
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
