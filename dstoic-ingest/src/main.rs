//! dstoic-ingest - load quote sheets into the quote store
//!
//! `dstoic-ingest quotes.csv` adds every new quote; `--reset` starts a new
//! usage cycle first (sqlite only); `--status` prints usage counts.

use anyhow::{bail, Context, Result};
use clap::Parser;
use dstoic_common::config::{load_config_or_default, StoreBackend, StoreConfig, StoreSection};
use dstoic_ingest::{ingest, read_source, IngestTarget};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for dstoic-ingest
#[derive(Parser, Debug)]
#[command(name = "dstoic-ingest")]
#[command(about = "Load quotes from a CSV or JSON file into the quote store")]
#[command(version)]
struct Args {
    /// Quote sheet (.csv with quote_text,author,source or .json)
    source: Option<PathBuf>,

    /// Mark every quote unused before ingesting (sqlite only)
    #[arg(long)]
    reset: bool,

    /// Print store usage counts
    #[arg(long)]
    status: bool,

    /// TOML config file (defaults to DSTOIC_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" (overrides RUST_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Quote store backend: sqlite or document
    #[arg(long, env = "DSTOIC_BACKEND")]
    backend: Option<StoreBackend>,

    /// SQLite database file
    #[arg(long, env = "DSTOIC_DATABASE")]
    database: Option<PathBuf>,

    /// Directory holding the quotes document
    #[arg(long, env = "DSTOIC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Blob name of the quotes document
    #[arg(long, env = "DSTOIC_BLOB_NAME")]
    blob_name: Option<String>,
}

/// Only the `[store]` table of the shared config file matters here
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IngestFileConfig {
    store: StoreSection,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    info!("Starting dstoic-ingest v{}", env!("CARGO_PKG_VERSION"));

    let file: IngestFileConfig =
        load_config_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    let overrides = StoreSection {
        backend: args.backend,
        database_path: args.database.clone(),
        data_dir: args.data_dir.clone(),
        blob_name: args.blob_name.clone(),
    };
    let config = StoreConfig::resolve(&overrides, &file.store);
    info!(backend = %config.backend, resource = %config.resource(), "Using quote store");

    let source = match (&args.source, args.status) {
        (Some(source), _) => source,
        (None, true) => {
            let target = IngestTarget::open_existing(&config)
                .await
                .context("Failed to open quote store")?;
            let status = target.status().await.context("Failed to read store status")?;
            println!("{}", status);
            return Ok(());
        }
        (None, false) => bail!("No SOURCE given (pass a .csv or .json file, or --status)"),
    };

    if args.reset && config.backend != StoreBackend::Sqlite {
        bail!("--reset requires the sqlite backend");
    }

    // Parse the whole sheet before touching the store
    let quotes = read_source(source)
        .with_context(|| format!("Failed to read quotes from {}", source.display()))?;

    let target = IngestTarget::create(&config)
        .await
        .context("Failed to open quote store")?;

    if args.reset {
        target.reset_cycle().await.context("Failed to reset usage cycle")?;
    }

    let stats = ingest(target.store(), quotes).await;
    info!("{}", stats);

    match target.status().await {
        Ok(status) => {
            info!(status = %status, "Final store counts");
            if args.status {
                println!("{}", status);
            }
        }
        Err(e) => warn!(error = %e, "Could not read final store counts"),
    }

    if stats.errors > 0 {
        bail!("{} quotes could not be stored", stats.errors);
    }
    Ok(())
}
