//! # dstoic Common Library
//!
//! Shared code for the dstoic bot and ingestion tool:
//! - Quote records and usage state
//! - Quote Store trait with relational (SQLite) and document (JSON blob) backends
//! - Least-recently-used selection policy
//! - Usage recorder
//! - Configuration loading
//! - Time helpers

pub mod config;
pub mod error;
pub mod models;
pub mod recorder;
pub mod selection;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use models::{InsertOutcome, NewQuote, QuoteIdentity, QuoteKey, QuoteRecord, Usage};
pub use recorder::{RecordOutcome, UsageRecorder};
pub use selection::{select_least_recently_used, UsageOrdered};
pub use store::QuoteStore;
