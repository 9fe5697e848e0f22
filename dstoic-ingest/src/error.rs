use std::path::PathBuf;
use thiserror::Error;

/// Ingestion errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Source file not found: {0}")]
    SourceNotFound(PathBuf),

    #[error("Unsupported source format '{0}' (expected .csv or .json)")]
    UnsupportedFormat(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] dstoic_common::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;
