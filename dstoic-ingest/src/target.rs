//! Store handles used by the ingestion CLI
//!
//! Unlike the bot, ingestion may create the backing resource. Status and
//! reset need backend-specific operations, so the concrete store is kept.

use dstoic_common::config::{StoreBackend, StoreConfig};
use dstoic_common::store::{DocumentQuoteStore, FsBlobStore, QuoteCounts, SqliteQuoteStore};
use dstoic_common::time::describe_unix_seconds;
use dstoic_common::{Error, QuoteRecord, QuoteStore, Result};
use std::fmt;
use tracing::info;

pub enum IngestTarget {
    Sqlite(SqliteQuoteStore),
    Document(DocumentQuoteStore<FsBlobStore>),
}

impl IngestTarget {
    /// Open the configured store, creating the database file if needed
    ///
    /// A missing quotes document is created on the first insert.
    pub async fn create(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Sqlite => Ok(IngestTarget::Sqlite(
                SqliteQuoteStore::create(&config.database_path).await?,
            )),
            StoreBackend::Document => Ok(IngestTarget::Document(document_store(config))),
        }
    }

    /// Open a store that must already exist
    pub async fn open_existing(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Sqlite => Ok(IngestTarget::Sqlite(
                SqliteQuoteStore::open(&config.database_path).await?,
            )),
            StoreBackend::Document => Ok(IngestTarget::Document(document_store(config))),
        }
    }

    pub fn store(&self) -> &dyn QuoteStore {
        match self {
            IngestTarget::Sqlite(store) => store,
            IngestTarget::Document(store) => store,
        }
    }

    /// Start a new usage cycle; only the relational backend has one
    pub async fn reset_cycle(&self) -> Result<u64> {
        match self {
            IngestTarget::Sqlite(store) => {
                let reset = store.reset_cycle().await?;
                info!(reset, "Reset quotes to unused");
                Ok(reset)
            }
            IngestTarget::Document(_) => Err(Error::Config(
                "--reset requires the sqlite backend; the document backend rotates by timestamp"
                    .to_string(),
            )),
        }
    }

    pub async fn status(&self) -> Result<StoreStatus> {
        match self {
            IngestTarget::Sqlite(store) => Ok(StoreStatus::Cycle(store.count().await?)),
            IngestTarget::Document(store) => {
                Ok(StoreStatus::from_records(&store.load_all().await?))
            }
        }
    }
}

fn document_store(config: &StoreConfig) -> DocumentQuoteStore<FsBlobStore> {
    DocumentQuoteStore::new(FsBlobStore::new(&config.data_dir), config.blob_name.clone())
}

/// Usage summary printed by `--status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Cycle(QuoteCounts),
    Timestamps {
        total: usize,
        never_used: usize,
        /// Most recent post, unix seconds (0 = never)
        last_used: i64,
    },
}

impl StoreStatus {
    pub fn from_records(records: &[QuoteRecord]) -> Self {
        StoreStatus::Timestamps {
            total: records.len(),
            never_used: records.iter().filter(|r| !r.usage.is_used()).count(),
            last_used: records
                .iter()
                .map(|r| r.usage.ordering_value())
                .max()
                .unwrap_or(0),
        }
    }
}

impl fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreStatus::Cycle(counts) => write!(
                f,
                "Database status:\n- Total quotes: {}\n- Used quotes: {}\n- Unused quotes: {}",
                counts.total, counts.used, counts.unused
            ),
            StoreStatus::Timestamps {
                total,
                never_used,
                last_used,
            } => write!(
                f,
                "Document status:\n- Total quotes: {}\n- Never used: {}\n- Last posted: {}",
                total,
                never_used,
                describe_unix_seconds(*last_used)
            ),
        }
    }
}
