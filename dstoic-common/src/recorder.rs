//! Usage recorder: marks the posted quote as used
//!
//! The record is re-located in persisted state by its `(text, author)` key at
//! write time, never by a position in an earlier snapshot.

use crate::models::QuoteKey;
use crate::store::QuoteStore;
use crate::{time, Error};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Result of one recording attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { at: DateTime<Utc> },
    /// No record with that key exists any more
    NotFound,
    Failed(String),
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded { .. })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageRecorder;

impl UsageRecorder {
    pub fn new() -> Self {
        Self
    }

    /// Record usage of `key` at the current time
    ///
    /// Never propagates an error; the outcome says what happened.
    pub async fn record(&self, store: &dyn QuoteStore, key: &QuoteKey) -> RecordOutcome {
        let at = time::now();
        self.record_at(store, key, at).await
    }

    pub async fn record_at(
        &self,
        store: &dyn QuoteStore,
        key: &QuoteKey,
        at: DateTime<Utc>,
    ) -> RecordOutcome {
        match store.record_usage(key, at).await {
            Ok(()) => {
                info!(
                    backend = store.backend(),
                    quote = %key,
                    at = %time::to_rfc3339(at),
                    "Recorded quote usage"
                );
                RecordOutcome::Recorded { at }
            }
            Err(Error::RecordNotFound(detail)) => {
                warn!(
                    backend = store.backend(),
                    quote = %key,
                    detail = %detail,
                    "Quote to record is no longer in the store"
                );
                RecordOutcome::NotFound
            }
            Err(e) => {
                error!(
                    backend = store.backend(),
                    resource = %store.resource(),
                    quote = %key,
                    error = %e,
                    "Failed to record quote usage"
                );
                RecordOutcome::Failed(e.to_string())
            }
        }
    }
}
