//! Quote sheet readers
//!
//! CSV: header row with `quote_text`, `author` and optional `source`.
//! JSON: `{"quotes": [...]}` or a bare array of `{text, author, source?}`.
//!
//! Rows without text or author are skipped with a warning and counted.
//! Fields are trimmed; an empty source becomes `None`.

use crate::error::{IngestError, Result};
use dstoic_common::models::preview;
use dstoic_common::NewQuote;
use serde::Deserialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

const CSV_TEXT: &str = "quote_text";
const CSV_AUTHOR: &str = "author";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Csv,
    Json,
}

impl SourceFormat {
    /// Format from the file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => Ok(SourceFormat::Csv),
            "json" => Ok(SourceFormat::Json),
            _ => Err(IngestError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Valid quotes of one source plus the number of rows dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceQuotes {
    pub quotes: Vec<NewQuote>,
    pub skipped: usize,
}

impl SourceQuotes {
    /// Rows seen in the source, valid or not
    pub fn rows(&self) -> usize {
        self.quotes.len() + self.skipped
    }

    fn push_row(&mut self, row: usize, text: Option<String>, author: Option<String>, source: Option<String>) {
        match (clean(text), clean(author)) {
            (Some(text), Some(author)) => self.quotes.push(NewQuote::new(text, author, clean(source))),
            (text, author) => {
                warn!(
                    row,
                    text = %text.as_deref().map(|t| preview(t, 30)).unwrap_or_default(),
                    author = author.as_deref().unwrap_or(""),
                    "Skipping row with missing text or author"
                );
                self.skipped += 1;
            }
        }
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read a source file, choosing the reader by extension
pub fn read_source(path: &Path) -> Result<SourceQuotes> {
    if !path.is_file() {
        return Err(IngestError::SourceNotFound(path.to_path_buf()));
    }
    let format = SourceFormat::from_path(path)?;
    info!(path = %path.display(), format = ?format, "Reading quotes");

    let quotes = match format {
        SourceFormat::Csv => read_csv(std::fs::File::open(path)?)?,
        SourceFormat::Json => read_json(&std::fs::read(path)?)?,
    };
    info!(
        valid = quotes.quotes.len(),
        skipped = quotes.skipped,
        "Found quotes in source"
    );
    Ok(quotes)
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(default)]
    quote_text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

pub fn read_csv<R: Read>(reader: R) -> Result<SourceQuotes> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    for required in [CSV_TEXT, CSV_AUTHOR] {
        if !headers.iter().any(|h| h == required) {
            return Err(IngestError::InvalidSource(format!(
                "CSV header has no '{}' column",
                required
            )));
        }
    }

    let mut quotes = SourceQuotes::default();
    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        match row {
            Ok(row) => quotes.push_row(line, row.quote_text, row.author, row.source),
            Err(e) => {
                warn!(row = line, error = %e, "Skipping unreadable CSV row");
                quotes.skipped += 1;
            }
        }
    }
    debug!(rows = quotes.rows(), "Parsed CSV source");
    Ok(quotes)
}

#[derive(Debug, Deserialize)]
struct JsonRow {
    #[serde(default, alias = "quote_text")]
    text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

pub fn read_json(bytes: &[u8]) -> Result<SourceQuotes> {
    let entries = match serde_json::from_slice::<Value>(bytes)? {
        Value::Array(entries) => entries,
        Value::Object(mut root) => match root.remove("quotes") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(IngestError::InvalidSource(
                    "expected a 'quotes' list".to_string(),
                ))
            }
        },
        _ => {
            return Err(IngestError::InvalidSource(
                "expected a list of quotes or an object with a 'quotes' list".to_string(),
            ))
        }
    };

    let mut quotes = SourceQuotes::default();
    for (index, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<JsonRow>(entry) {
            Ok(row) => quotes.push_row(index, row.text, row.author, row.source),
            Err(e) => {
                warn!(row = index, error = %e, "Skipping invalid JSON entry");
                quotes.skipped += 1;
            }
        }
    }
    debug!(rows = quotes.rows(), "Parsed JSON source");
    Ok(quotes)
}
