//! questcache - command-line front end for the Bitcoin Quest offline cache.
//!
//! Inspects and edits the local store (progress snapshots, the pending-update
//! queue, cached content) and flushes queued updates to the API.

mod commands;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use questcache_core::{Config, HttpMethod};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Session;

/// Log file prefix inside the logs directory
const LOG_FILE_PREFIX: &str = "questcache.log";

#[derive(Parser, Debug)]
#[command(name = "questcache", version)]
#[command(about = "Bitcoin Quest offline cache - progress, pending updates and cached content", long_about = None)]
struct Cli {
    /// Treat the API as unreachable (nothing is sent)
    #[arg(long, global = true)]
    offline: bool,

    /// Store directory (overrides config and QUESTCACHE_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connectivity, queue size and cache age
    Status,
    /// Read or write progress snapshots
    #[command(subcommand)]
    Progress(ProgressCommand),
    /// Inspect or edit the pending-update queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Inspect or edit cached content
    #[command(subcommand)]
    Content(ContentCommand),
    /// Drop old or excess content cache entries
    Evict {
        /// Remove entries written more than this many days ago
        #[arg(long, value_name = "DAYS")]
        older_than_days: Option<u32>,
        /// Keep at most this many entries, oldest removed first
        #[arg(long, value_name = "N")]
        max_entries: Option<usize>,
    },
    /// Replay queued updates against the API
    Sync {
        /// Keep running: sync on reconnect and on the configured retry
        /// interval until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
    /// Erase all offline data
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProgressCommand {
    /// Print the snapshot stored for a user
    Get { user_id: String },
    /// Store a snapshot read from a JSON file, or stdin with "-"
    Save { file: String },
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
    /// List queued updates, oldest first
    List,
    /// Queue an update for later delivery
    Add {
        #[arg(long, default_value = "POST")]
        method: HttpMethod,
        #[arg(long)]
        url: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
    /// Remove a queued update by id
    Remove { id: u64 },
}

#[derive(Subcommand, Debug)]
enum ContentCommand {
    /// Cache a JSON payload under a key
    Put { key: String, json: String },
    /// Print the cached payload for a key
    Get { key: String },
    /// List cached keys with their age
    List,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr and, when the directory can be created, to a daily
/// rolling file. The returned guard must live until exit so the file writer
/// flushes.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.map(|dir| std::fs::create_dir_all(dir).map(|_| dir)) {
        Some(Ok(dir)) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(cli: &Cli) -> (Config, Option<anyhow::Error>) {
    let (mut config, load_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };
    config.apply_env();
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    if cli.offline {
        config.start_offline = true;
    }
    (config, load_error)
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C, stopping");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let (config, load_error) = load_config(&cli);

    let log_dir = config.log_dir().ok();
    let _guard = init_tracing(log_dir.as_deref());
    if let Some(e) = load_error {
        warn!(error = %e, "Could not load config, using defaults");
    }
    info!(command = ?cli.command, "questcache starting");

    let session = Session::open(config)
        .await
        .context("Failed to open the offline store")?;

    match cli.command {
        Command::Status => session.status().await,
        Command::Progress(ProgressCommand::Get { user_id }) => session.progress_get(&user_id).await,
        Command::Progress(ProgressCommand::Save { file }) => session.progress_save(&file).await,
        Command::Queue(QueueCommand::List) => session.queue_list().await,
        Command::Queue(QueueCommand::Add { method, url, data }) => {
            session.queue_add(method, url, data.as_deref()).await
        }
        Command::Queue(QueueCommand::Remove { id }) => session.queue_remove(id).await,
        Command::Content(ContentCommand::Put { key, json }) => session.content_put(&key, &json).await,
        Command::Content(ContentCommand::Get { key }) => session.content_get(&key).await,
        Command::Content(ContentCommand::List) => session.content_list().await,
        Command::Evict {
            older_than_days,
            max_entries,
        } => session.evict(older_than_days, max_entries).await,
        Command::Sync { watch: false } => session.sync().await,
        Command::Sync { watch: true } => session.sync_watch(ctrl_c()).await,
        Command::Clear { yes } => session.clear(yes).await,
    }
}
