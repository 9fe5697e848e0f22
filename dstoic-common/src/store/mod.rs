//! Quote Store: durable collection of quote records
//!
//! Two backends satisfy the same contract with different concurrency
//! guarantees:
//! - [`SqliteQuoteStore`]: one row per quote, usage recorded by a single
//!   atomic `UPDATE`
//! - [`DocumentQuoteStore`]: one JSON document in a blob store, rewritten as
//!   a whole under a generation precondition
//!
//! A deployment picks exactly one. Nothing here falls back from one backend
//! (or from a missing resource) to another data source.

pub mod blob;
pub mod document;
pub mod sqlite;

pub use blob::{Blob, BlobStore, FsBlobStore, Generation, MemoryBlobStore, WritePrecondition};
pub use document::{DocumentQuoteStore, DEFAULT_BLOB_NAME};
pub use sqlite::{QuoteCounts, SqliteQuoteStore, UsageUpdate};

use crate::config::{StoreBackend, StoreConfig};
use crate::models::{InsertOutcome, NewQuote, QuoteKey, QuoteRecord};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Capability interface shared by both backends
#[async_trait]
pub trait QuoteStore: Send + Sync {
    /// Backend name for log lines
    fn backend(&self) -> &'static str;

    /// Human-readable location of the backing resource
    fn resource(&self) -> String;

    /// Every record with its current usage state, read as one snapshot
    ///
    /// Fails with `StoreUnavailable` or `MalformedState`; never returns a
    /// partial list.
    async fn load_all(&self) -> Result<Vec<QuoteRecord>>;

    /// Idempotent insert keyed on `(text, author)`
    async fn insert(&self, quote: NewQuote) -> Result<InsertOutcome>;

    /// Insert a batch; outcomes are returned in input order
    async fn insert_many(&self, quotes: Vec<NewQuote>) -> Result<Vec<InsertOutcome>> {
        let mut outcomes = Vec::with_capacity(quotes.len());
        for quote in quotes {
            outcomes.push(self.insert(quote).await?);
        }
        Ok(outcomes)
    }

    /// Mark the record identified by `key` as used at `at`
    ///
    /// Re-locates the record in the persisted data; `RecordNotFound` when it
    /// is gone.
    async fn record_usage(&self, key: &QuoteKey, at: DateTime<Utc>) -> Result<()>;
}

/// Open the configured backend for the bot (the resource must already exist)
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn QuoteStore>> {
    let store: Arc<dyn QuoteStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqliteQuoteStore::open(&config.database_path).await?),
        StoreBackend::Document => Arc::new(DocumentQuoteStore::new(
            FsBlobStore::new(&config.data_dir),
            config.blob_name.clone(),
        )),
    };
    info!(backend = store.backend(), resource = %store.resource(), "Quote store opened");
    Ok(store)
}

/// Reject quotes without text or author before they reach a backend
pub(crate) fn validate_new_quote(quote: &NewQuote) -> Result<()> {
    if quote.text.trim().is_empty() {
        return Err(Error::InvalidInput("quote text must not be empty".to_string()));
    }
    if quote.author.trim().is_empty() {
        return Err(Error::InvalidInput("quote author must not be empty".to_string()));
    }
    Ok(())
}
