//! dstoic-bot - posts one quote per run
//!
//! Intended to be started by a scheduler (cron, systemd timer). Each run
//! selects the least recently used quote, generates an image and explanation,
//! publishes them and records the quote as used.
//!
//! Exit status: 0 when a post went out or there was nothing to post, 1 for
//! every other halt or a startup failure.

use anyhow::{Context, Result};
use clap::Parser;
use dstoic_bot::services::{GeminiClient, PassthroughComposer, TelegramPublisher};
use dstoic_bot::{BotConfig, BotOverrides, CycleController, RecordPolicy};
use dstoic_common::config::{StoreBackend, StoreSection};
use dstoic_common::store::open_store;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for dstoic-bot
#[derive(Parser, Debug)]
#[command(name = "dstoic-bot")]
#[command(about = "Post a Stoic quote with a generated image to a Telegram channel")]
#[command(version)]
struct Args {
    /// TOML config file (defaults to DSTOIC_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "dstoic_bot=debug" (overrides RUST_LOG)
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

    /// When to mark the quote as used: after_publish or at_selection
    #[arg(long, env = "DSTOIC_RECORD_POLICY")]
    record_policy: Option<RecordPolicy>,

    /// Number of images to generate and choose from (1-4)
    #[arg(long, env = "DSTOIC_IMAGE_CANDIDATES")]
    image_candidates: Option<u8>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHANNEL_ID")]
    telegram_channel_id: Option<String>,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,
}

impl Args {
    fn overrides(&self) -> BotOverrides {
        BotOverrides {
            store: StoreSection {
                backend: self.backend,
                database_path: self.database.clone(),
                data_dir: self.data_dir.clone(),
                blob_name: self.blob_name.clone(),
            },
            record_policy: self.record_policy,
            image_candidates: self.image_candidates,
            telegram_bot_token: self.telegram_bot_token.clone(),
            telegram_channel_id: self.telegram_channel_id.clone(),
            gemini_api_key: self.gemini_api_key.clone(),
        }
    }
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

    info!("Starting dstoic-bot v{}", env!("CARGO_PKG_VERSION"));

    let config = BotConfig::load(args.config.as_deref(), args.overrides())
        .context("Failed to load configuration")?;
    info!(
        backend = %config.store.backend,
        resource = %config.store.resource(),
        policy = %config.cycle.record_policy,
        image_candidates = config.cycle.image_candidates,
        "Configuration loaded"
    );

    let store = open_store(&config.store)
        .await
        .context("Failed to open quote store")?;
    let generator =
        GeminiClient::new(config.gemini.clone()).context("Failed to create Gemini client")?;
    let publisher = TelegramPublisher::new(config.telegram.clone())
        .context("Failed to create Telegram client")?;

    let controller = CycleController::new(
        store,
        Arc::new(generator),
        Arc::new(PassthroughComposer::new()),
        Arc::new(publisher),
        config.cycle.clone(),
    );

    let report = controller.run_once().await;
    let code = report.exit_code();
    info!(
        outcome = ?report.outcome,
        step = %report.step,
        exit_code = code,
        "dstoic-bot finished"
    );

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
