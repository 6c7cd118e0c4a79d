//! # chainlog-cli
//!
//! Command-line interface for chainlog partitions:
//! - `chainlog append <partition> <json>` - append an entry (`-` reads stdin)
//! - `chainlog read <partition>` - print entries from a start seq
//! - `chainlog tail <partition> [-n N] [-f]` - last entries, optionally follow
//! - `chainlog verify <partition>` - check the hash chain
//! - `chainlog list` / `chainlog last <partition>`

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use chainlog::{ChainLog, LogConfig};

/// Append-only, hash-chained event log.
#[derive(Parser)]
#[command(name = "chainlog", version, about)]
struct Cli {
    /// Directory holding partition files (overrides the config file).
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, default_value = "chainlog.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append an entry to a partition.
    Append {
        partition: String,
        /// JSON payload, or `-` to read it from stdin.
        data: String,
    },
    /// Print entries starting at a sequence number.
    Read {
        partition: String,
        #[arg(long, default_value = "0")]
        start: u64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the last entries, optionally following new ones.
    Tail {
        partition: String,
        /// Number of entries to show (default: all, or none with --start).
        #[arg(short)]
        n: Option<usize>,
        /// Keep waiting for new entries (Ctrl+C to stop).
        #[arg(short, long)]
        follow: bool,
        /// Start at this sequence number instead of the last N.
        #[arg(long, conflicts_with = "n")]
        start: Option<u64>,
    },
    /// Verify a partition's hash chain.
    Verify { partition: String },
    /// List partitions.
    List,
    /// Print the last entry of a partition.
    Last { partition: String },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they don't mix with entry output on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chainlog=warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let mut config = LogConfig::load_or_default(&cli.config)?;
    if let Some(dir) = cli.dir {
        config.base_dir = dir;
    }
    tracing::debug!(base_dir = %config.base_dir.display(), "using log directory");
    let log = ChainLog::open(config)?;

    match &cli.command {
        Commands::Append { partition, data } => commands::append::execute(&log, partition, data),
        Commands::Read {
            partition,
            start,
            limit,
        } => commands::read::read(&log, partition, *start, *limit),
        Commands::Tail {
            partition,
            n,
            follow,
            start,
        } => commands::read::tail(&log, partition, *n, *start, *follow),
        Commands::Verify { partition } => commands::verify::execute(&log, partition),
        Commands::List => commands::list::execute(&log),
        Commands::Last { partition } => commands::read::last(&log, partition),
    }
}
