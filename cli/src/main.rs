use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use feedstore_kernel::config::FeedConfig;
use feedstore_kernel::env::SystemClock;
use feedstore_kernel::feed::{FeedResult, Identity, JsonFileRecordStore, RecordIndex, Timestamp};
use feedstore_kernel::notify::TracingSink;
use feedstore_kernel::replay::open_feed;

/// Oracle feed store CLI
#[derive(Parser, Debug)]
#[command(name = "feedstore")]
#[command(about = "Single-writer append-only oracle feed", long_about = None)]
struct Cli {
    /// Path to config JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the feed data file (overrides config)
    #[arg(long)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set the authorized writer. Only succeeds once per feed.
    Init {
        #[arg(long)]
        writer: Uuid,
    },

    /// Append a result as `--as`
    Set {
        #[arg(long = "as")]
        caller: Uuid,

        /// 32-byte result as hex
        #[arg(long)]
        result: FeedResult,

        /// UNIX seconds; must not be in the future
        #[arg(long)]
        date: Timestamp,
    },

    /// Look up a result by 1-based index
    ByIndex { index: RecordIndex },

    /// Look up a result by exact date
    ByDate { date: Timestamp },

    /// Most recent result, if any
    Latest,

    HasIndex { index: RecordIndex },

    HasDate { date: Timestamp },
}

#[derive(Debug, Serialize)]
struct RecordOutput {
    index: RecordIndex,
    date: Timestamp,
    result: FeedResult,
}

#[derive(Debug, Serialize)]
struct LatestOutput {
    result: Option<FeedResult>,
    date: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct PresenceOutput {
    present: bool,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid log filter `{default_filter}`"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let mut config = match cli.config.as_deref() {
        Some(path) => FeedConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FeedConfig::default_config(),
    };
    if let Some(data) = cli.data {
        config.data_file = data;
    }

    init_tracing(&config.log_filter)?;

    // ----------------------------
    // Open feed
    // ----------------------------
    let backend = JsonFileRecordStore::open(&config.data_file)
        .with_context(|| format!("opening feed {}", config.data_file.display()))?;
    tracing::debug!(path = %backend.path().display(), "feed file opened");

    let feed = open_feed(backend, Arc::new(SystemClock), Arc::new(TracingSink))?;

    // ----------------------------
    // Run command
    // ----------------------------
    let output = match cli.command {
        Command::Init { writer } => {
            let writer = Identity(writer);
            feed.initialize(writer)?;
            serde_json::json!({ "writer": writer })
        }
        Command::Set {
            caller,
            result,
            date,
        } => {
            let index = feed.append(&Identity(caller), result, date)?;
            serde_json::to_value(RecordOutput {
                index,
                date,
                result,
            })?
        }
        Command::ByIndex { index } => {
            let (result, date) = feed.result_by_index(index)?;
            serde_json::to_value(RecordOutput {
                index,
                date,
                result,
            })?
        }
        Command::ByDate { date } => {
            let (result, index) = feed.result_by_date(date)?;
            serde_json::to_value(RecordOutput {
                index,
                date,
                result,
            })?
        }
        Command::Latest => serde_json::to_value(LatestOutput {
            result: feed.latest_result(),
            date: feed.latest_result_date(),
        })?,
        Command::HasIndex { index } => serde_json::to_value(PresenceOutput {
            present: feed.index_has_result(index),
        })?,
        Command::HasDate { date } => serde_json::to_value(PresenceOutput {
            present: feed.date_has_result(date),
        })?,
    };

    // ----------------------------
    // Output
    // ----------------------------
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
