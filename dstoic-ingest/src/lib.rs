//! dstoic-ingest library
//!
//! Reads quote sheets (CSV or JSON) and loads them into either Quote Store
//! backend. Also reports per-backend usage status.

pub mod error;
pub mod ingest;
pub mod source;
pub mod target;

pub use error::{IngestError, Result};
pub use ingest::{ingest, IngestStats};
pub use source::{read_csv, read_json, read_source, SourceFormat, SourceQuotes};
pub use target::{IngestTarget, StoreStatus};
