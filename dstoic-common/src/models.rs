//! Quote records and usage state

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Natural key of a quotation: the `(text, author)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteKey {
    pub text: String,
    pub author: String,
}

impl QuoteKey {
    pub fn new(text: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
        }
    }

    /// Shortened text for log lines
    pub fn preview(&self) -> String {
        preview(&self.text, 50)
    }
}

impl fmt::Display for QuoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" by {}", self.preview(), self.author)
    }
}

/// Usage state of a record
///
/// The relational store tracks a per-cycle flag, the document store a
/// last-used unix timestamp (0 = never used).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Usage {
    Cycle {
        used: bool,
        last_used_date: Option<String>,
    },
    Timestamp(i64),
}

impl Usage {
    pub const NEVER_USED: Usage = Usage::Timestamp(0);

    /// Numeric value ranked by the selection policy
    pub fn ordering_value(&self) -> i64 {
        match self {
            Usage::Cycle { used, .. } => i64::from(*used),
            Usage::Timestamp(ts) => *ts,
        }
    }

    pub fn is_used(&self) -> bool {
        self.ordering_value() > 0
    }
}

/// One quotation available for posting
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    /// Row id (relational store only)
    pub id: Option<i64>,
    pub text: String,
    pub author: String,
    pub source: Option<String>,
    pub usage: Usage,
    /// Unrecognised document fields, written back unchanged
    pub extra: Map<String, Value>,
}

impl QuoteRecord {
    pub fn key(&self) -> QuoteKey {
        QuoteKey::new(self.text.clone(), self.author.clone())
    }

    pub fn matches(&self, key: &QuoteKey) -> bool {
        self.text == key.text && self.author == key.author
    }

    pub fn identity(&self) -> QuoteIdentity {
        match self.id {
            Some(id) => QuoteIdentity::Row(id),
            None => QuoteIdentity::Key(self.key()),
        }
    }
}

/// Quotation to be inserted by ingestion
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewQuote {
    pub text: String,
    pub author: String,
    pub source: Option<String>,
}

impl NewQuote {
    pub fn new(text: impl Into<String>, author: impl Into<String>, source: Option<String>) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            source,
        }
    }

    pub fn key(&self) -> QuoteKey {
        QuoteKey::new(self.text.clone(), self.author.clone())
    }
}

/// Identity of a stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuoteIdentity {
    /// `quote_id` primary key
    Row(i64),
    /// Document entries have no numeric id
    Key(QuoteKey),
}

impl fmt::Display for QuoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteIdentity::Row(id) => write!(f, "quote_id={}", id),
            QuoteIdentity::Key(key) => write!(f, "{}", key),
        }
    }
}

/// Result of an idempotent insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    pub identity: QuoteIdentity,
    /// false when `(text, author)` already existed
    pub created: bool,
}

/// Truncate on a char boundary, appending "..." when shortened
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}
