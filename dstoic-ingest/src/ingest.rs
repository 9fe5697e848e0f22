//! Loading quotes into a store

use crate::source::SourceQuotes;
use dstoic_common::models::preview;
use dstoic_common::{InsertOutcome, NewQuote, QuoteStore};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Rows in the source, including skipped ones
    pub total: usize,
    pub inserted: usize,
    /// Already present under the same text and author
    pub duplicates: usize,
    /// Rows without text or author
    pub skipped: usize,
    pub errors: usize,
}

impl IngestStats {
    fn tally(&mut self, outcome: &InsertOutcome) {
        if outcome.created {
            self.inserted += 1;
        } else {
            self.duplicates += 1;
        }
    }
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows: {} inserted, {} duplicates, {} skipped, {} errors",
            self.total, self.inserted, self.duplicates, self.skipped, self.errors
        )
    }
}

/// Insert every valid quote of `source` into `store`
///
/// The batch is written in one call. If that fails the quotes are retried one
/// at a time so a single bad row cannot hide the rest; each failure counts
/// as an error.
pub async fn ingest(store: &dyn QuoteStore, source: SourceQuotes) -> IngestStats {
    let mut stats = IngestStats {
        total: source.rows(),
        skipped: source.skipped,
        ..Default::default()
    };
    if source.quotes.is_empty() {
        warn!("No valid quotes to ingest");
        return stats;
    }

    info!(
        backend = store.backend(),
        resource = %store.resource(),
        count = source.quotes.len(),
        "Ingesting quotes"
    );

    match store.insert_many(source.quotes.clone()).await {
        Ok(outcomes) => {
            for outcome in &outcomes {
                stats.tally(outcome);
            }
        }
        Err(e) => {
            warn!(error = %e, "Batch insert failed; inserting quotes one at a time");
            insert_each(store, source.quotes, &mut stats).await;
        }
    }

    info!(
        total = stats.total,
        inserted = stats.inserted,
        duplicates = stats.duplicates,
        skipped = stats.skipped,
        errors = stats.errors,
        "Quote ingestion completed"
    );
    stats
}

async fn insert_each(store: &dyn QuoteStore, quotes: Vec<NewQuote>, stats: &mut IngestStats) {
    for quote in quotes {
        let label = preview(&quote.text, 30);
        match store.insert(quote).await {
            Ok(outcome) => {
                debug!(quote = %label, identity = %outcome.identity, created = outcome.created, "Quote processed");
                stats.tally(&outcome);
            }
            Err(e) => {
                error!(quote = %label, error = %e, "Failed to add quote");
                stats.errors += 1;
            }
        }
    }
}
