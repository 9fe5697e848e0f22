//! Document quote store (single JSON blob)
//!
//! Layout: `{"quotes": [{"text", "author", "source"?, "last_used_timestamp"}]}`
//! stored under one well-known blob name and rewritten as a whole on every
//! update. Usage is the unix second the quote was last posted (0 = never).
//!
//! Every rewrite is conditional on the generation that was read, so two
//! overlapping runs cannot silently drop each other's timestamp: the loser
//! gets `Conflict`, reloads and retries.

use super::blob::{BlobStore, Generation, WritePrecondition};
use super::{validate_new_quote, QuoteStore};
use crate::models::{InsertOutcome, NewQuote, QuoteIdentity, QuoteKey, QuoteRecord, Usage};
use crate::{time, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

/// Default blob name of the quotes document
pub const DEFAULT_BLOB_NAME: &str = "quotes.json";

/// Reload-and-retry attempts when a conditional write loses a race
const MAX_WRITE_ATTEMPTS: usize = 3;

const KEY_QUOTES: &str = "quotes";
const KEY_TEXT: &str = "text";
const KEY_AUTHOR: &str = "author";
const KEY_SOURCE: &str = "source";
const KEY_TIMESTAMP: &str = "last_used_timestamp";

struct Snapshot {
    records: Vec<QuoteRecord>,
    generation: Generation,
}

pub struct DocumentQuoteStore<B: BlobStore> {
    blobs: B,
    blob_name: String,
}

impl<B: BlobStore> DocumentQuoteStore<B> {
    pub fn new(blobs: B, blob_name: impl Into<String>) -> Self {
        Self {
            blobs,
            blob_name: blob_name.into(),
        }
    }

    pub fn blob_store(&self) -> &B {
        &self.blobs
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    async fn read_optional(&self) -> Result<Option<Snapshot>> {
        let resource = self.resource();
        let blob = match self.blobs.read(&self.blob_name).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return Ok(None),
            Err(e) => {
                error!(blob = %resource, error = %e, "Failed to read quotes document");
                return Err(e);
            }
        };

        let records = parse_document(&blob.bytes, &resource).map_err(|e| {
            error!(blob = %resource, error = %e, "Quotes document has unexpected shape");
            e
        })?;
        Ok(Some(Snapshot {
            records,
            generation: blob.generation,
        }))
    }

    async fn read_snapshot(&self) -> Result<Snapshot> {
        match self.read_optional().await? {
            Some(snapshot) => Ok(snapshot),
            None => {
                let resource = self.resource();
                error!(blob = %resource, "Quotes document does not exist");
                Err(Error::unavailable(resource, "quotes document does not exist"))
            }
        }
    }

    async fn write_records(
        &self,
        records: &[QuoteRecord],
        precondition: WritePrecondition,
    ) -> Result<Generation> {
        let bytes = render_document(records)?;
        self.blobs.write(&self.blob_name, bytes, precondition).await
    }

    /// Persist the full record set, replacing the document
    pub async fn save_all(&self, records: &[QuoteRecord]) -> Result<()> {
        let generation = self
            .write_records(records, WritePrecondition::Any)
            .await
            .map_err(|e| {
                error!(blob = %self.resource(), error = %e, "Failed to save quotes document");
                e
            })?;
        debug!(count = records.len(), generation = %generation, "Saved quotes document");
        Ok(())
    }

    /// Add `quotes` that are not yet present, creating the document if needed
    async fn insert_batch(&self, quotes: Vec<NewQuote>) -> Result<Vec<InsertOutcome>> {
        for quote in &quotes {
            validate_new_quote(quote)?;
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let (mut records, precondition) = match self.read_optional().await? {
                Some(snapshot) => (
                    snapshot.records,
                    WritePrecondition::Matches(snapshot.generation),
                ),
                None => {
                    info!(blob = %self.resource(), "Creating new quotes document");
                    (Vec::new(), WritePrecondition::DoesNotExist)
                }
            };

            let mut outcomes = Vec::with_capacity(quotes.len());
            let mut added = 0usize;
            for quote in &quotes {
                let key = quote.key();
                let created = !records.iter().any(|r| r.matches(&key));
                if created {
                    records.push(QuoteRecord {
                        id: None,
                        text: quote.text.clone(),
                        author: quote.author.clone(),
                        source: quote.source.clone(),
                        usage: Usage::NEVER_USED,
                        extra: Map::new(),
                    });
                    added += 1;
                } else {
                    warn!(quote = %key, "Quote already exists; keeping existing record");
                }
                outcomes.push(InsertOutcome {
                    identity: QuoteIdentity::Key(key),
                    created,
                });
            }

            if added == 0 {
                return Ok(outcomes);
            }

            match self.write_records(&records, precondition).await {
                Ok(_) => {
                    debug!(added, total = records.len(), "Inserted quotes into document");
                    return Ok(outcomes);
                }
                Err(Error::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(attempt, %reason, "Quotes document changed during insert; retrying");
                }
                Err(e) => {
                    error!(blob = %self.resource(), error = %e, "Failed to write quotes document");
                    return Err(e);
                }
            }
        }

        Err(Error::Conflict(format!(
            "{} kept changing during insert",
            self.resource()
        )))
    }
}

#[async_trait]
impl<B: BlobStore> QuoteStore for DocumentQuoteStore<B> {
    fn backend(&self) -> &'static str {
        "document"
    }

    fn resource(&self) -> String {
        self.blobs.location(&self.blob_name)
    }

    async fn load_all(&self) -> Result<Vec<QuoteRecord>> {
        let snapshot = self.read_snapshot().await?;
        debug!(count = snapshot.records.len(), "Loaded quotes document");
        Ok(snapshot.records)
    }

    async fn insert(&self, quote: NewQuote) -> Result<InsertOutcome> {
        let mut outcomes = self.insert_batch(vec![quote]).await?;
        outcomes
            .pop()
            .ok_or_else(|| Error::InvalidInput("no quote to insert".to_string()))
    }

    async fn insert_many(&self, quotes: Vec<NewQuote>) -> Result<Vec<InsertOutcome>> {
        if quotes.is_empty() {
            return Ok(Vec::new());
        }
        self.insert_batch(quotes).await
    }

    async fn record_usage(&self, key: &QuoteKey, at: DateTime<Utc>) -> Result<()> {
        let timestamp = time::unix_seconds(at);

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let Snapshot {
                mut records,
                generation,
            } = self.read_snapshot().await?;

            let record = match records.iter_mut().find(|r| r.matches(key)) {
                Some(record) => record,
                None => return Err(Error::RecordNotFound(key.to_string())),
            };
            record.usage = Usage::Timestamp(timestamp);

            match self
                .write_records(&records, WritePrecondition::Matches(generation))
                .await
            {
                Ok(_) => {
                    debug!(quote = %key, timestamp, "Recorded quote usage in document");
                    return Ok(());
                }
                Err(Error::Conflict(reason)) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(attempt, %reason, "Quotes document changed during update; retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Conflict(format!(
            "{} kept changing while recording usage",
            self.resource()
        )))
    }
}

/// Parse the quotes document
///
/// Wrong top-level shape, non-object entries, or entries without string
/// `text`/`author` make the whole document malformed. Missing or
/// non-numeric timestamps become 0 (never used).
pub fn parse_document(bytes: &[u8], resource: &str) -> Result<Vec<QuoteRecord>> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::malformed(resource, e))?;

    let mut root = match value {
        Value::Object(map) => map,
        other => {
            return Err(Error::malformed(
                resource,
                format!("expected an object with a '{}' key, found {}", KEY_QUOTES, kind(&other)),
            ))
        }
    };

    let entries = match root.remove(KEY_QUOTES) {
        Some(Value::Array(entries)) => entries,
        Some(other) => {
            return Err(Error::malformed(
                resource,
                format!("'{}' must be a list, found {}", KEY_QUOTES, kind(&other)),
            ))
        }
        None => {
            return Err(Error::malformed(
                resource,
                format!("missing '{}' key", KEY_QUOTES),
            ))
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| parse_entry(index, entry, resource))
        .collect()
}

fn parse_entry(index: usize, entry: Value, resource: &str) -> Result<QuoteRecord> {
    let mut fields = match entry {
        Value::Object(fields) => fields,
        other => {
            return Err(Error::malformed(
                resource,
                format!("entry {} is {}, expected an object", index, kind(&other)),
            ))
        }
    };

    let text = take_string(&mut fields, KEY_TEXT)
        .ok_or_else(|| Error::malformed(resource, format!("entry {} has no string 'text'", index)))?;
    let author = take_string(&mut fields, KEY_AUTHOR).ok_or_else(|| {
        Error::malformed(resource, format!("entry {} has no string 'author'", index))
    })?;

    let source = match fields.remove(KEY_SOURCE) {
        Some(Value::String(source)) => Some(source),
        None | Some(Value::Null) => None,
        Some(other) => {
            warn!(entry = index, "Ignoring non-string source; keeping it unchanged");
            fields.insert(KEY_SOURCE.to_string(), other);
            None
        }
    };

    let timestamp = match fields.remove(KEY_TIMESTAMP) {
        None => 0,
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(other) => {
            warn!(
                entry = index,
                author = %author,
                value = %other,
                "Non-numeric timestamp found; treating quote as never used"
            );
            0
        }
    };

    Ok(QuoteRecord {
        id: None,
        text,
        author,
        source,
        usage: Usage::Timestamp(timestamp),
        extra: fields,
    })
}

/// Serialize records to the document layout (2-space indented JSON)
pub fn render_document(records: &[QuoteRecord]) -> Result<Vec<u8>> {
    let entries: Vec<Value> = records
        .iter()
        .map(|record| {
            let mut entry = record.extra.clone();
            entry.insert(KEY_TEXT.to_string(), Value::String(record.text.clone()));
            entry.insert(KEY_AUTHOR.to_string(), Value::String(record.author.clone()));
            if let Some(source) = &record.source {
                entry.insert(KEY_SOURCE.to_string(), Value::String(source.clone()));
            }
            entry.insert(
                KEY_TIMESTAMP.to_string(),
                Value::from(document_timestamp(&record.usage)),
            );
            Value::Object(entry)
        })
        .collect();

    let mut root = Map::new();
    root.insert(KEY_QUOTES.to_string(), Value::Array(entries));
    Ok(serde_json::to_vec_pretty(&Value::Object(root))?)
}

/// Timestamp for records that came from the relational layout
fn document_timestamp(usage: &Usage) -> i64 {
    match usage {
        Usage::Timestamp(ts) => *ts,
        Usage::Cycle { used: false, .. } => 0,
        Usage::Cycle {
            used: true,
            last_used_date,
        } => last_used_date
            .as_deref()
            .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|at| at.timestamp())
            .unwrap_or(1),
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
