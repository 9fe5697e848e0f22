//! Relational quote store (SQLite)
//!
//! One row per quotation in the `quotes` table. Usage is a per-cycle flag plus
//! the date it was last set; a new cycle starts with [`SqliteQuoteStore::reset_cycle`].
//! Recording usage is a single `UPDATE ... WHERE quote_text = ? AND author = ?`,
//! so lookup and write are one atomic statement.

use super::{validate_new_quote, QuoteStore};
use crate::models::{InsertOutcome, NewQuote, QuoteIdentity, QuoteKey, QuoteRecord, Usage};
use crate::{time, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Map;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

const REQUIRED_COLUMNS: [&str; 6] = [
    "quote_id",
    "quote_text",
    "author",
    "source",
    "is_used_in_current_cycle",
    "last_used_date",
];

/// Natural key columns that must carry a unique index
const KEY_COLUMNS: [&str; 2] = ["author", "quote_text"];

/// Usage fields written by [`SqliteQuoteStore::update_one`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageUpdate {
    pub used: bool,
    pub last_used_date: Option<String>,
}

impl UsageUpdate {
    pub fn used_at(at: DateTime<Utc>) -> Self {
        Self {
            used: true,
            last_used_date: Some(time::to_rfc3339(at)),
        }
    }
}

/// Total / used / unused counts for the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuoteCounts {
    pub total: i64,
    pub used: i64,
    pub unused: i64,
}

pub struct SqliteQuoteStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteQuoteStore {
    /// Open an existing quote database
    ///
    /// The file must exist and contain a `quotes` table with the expected
    /// columns. Nothing is created on this path.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let resource = db_path.display().to_string();
        if !db_path.is_file() {
            error!(path = %resource, "Quote database does not exist");
            return Err(Error::unavailable(resource, "database file does not exist"));
        }

        let pool = connect(db_path, "rw").await?;
        let store = Self {
            pool,
            path: db_path.to_path_buf(),
        };
        store.verify_schema().await?;

        info!(path = %resource, "Opened quote database");
        Ok(store)
    }

    /// Open or create the quote database (ingestion path)
    pub async fn create(db_path: &Path) -> Result<Self> {
        let resource = db_path.display().to_string();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    error!(path = %parent.display(), error = %e, "Failed to create database directory");
                    Error::unavailable(parent.display().to_string(), e)
                })?;
            }
        }

        let newly_created = !db_path.exists();
        let pool = connect(db_path, "rwc").await?;
        create_quotes_table(&pool)
            .await
            .map_err(|e| classify(&resource, "create table", e))?;

        let store = Self {
            pool,
            path: db_path.to_path_buf(),
        };
        store.verify_schema().await?;

        if newly_created {
            info!("Initialized new quote database: {}", resource);
        } else {
            info!("Opened existing quote database: {}", resource);
        }
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn verify_schema(&self) -> Result<()> {
        let resource = self.resource();
        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('quotes')")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| classify(&resource, "inspect schema", e))?;

        if columns.is_empty() {
            error!(path = %resource, "Quote database has no quotes table");
            return Err(Error::malformed(resource, "missing table 'quotes'"));
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|required| !columns.iter().any(|c| c.as_str() == *required))
            .collect();
        if !missing.is_empty() {
            error!(path = %resource, missing = ?missing, "Quote table has unexpected schema");
            return Err(Error::malformed(
                resource,
                format!("quotes table missing columns: {}", missing.join(", ")),
            ));
        }

        if !self.has_unique_key_index(&resource).await? {
            error!(path = %resource, "Quote table has no unique index on (quote_text, author)");
            return Err(Error::malformed(
                resource,
                "quotes table has no UNIQUE(quote_text, author) constraint",
            ));
        }

        Ok(())
    }

    /// Whether some unique index covers exactly `(quote_text, author)`
    async fn has_unique_key_index(&self, resource: &str) -> Result<bool> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT il.name, ii.name
            FROM pragma_index_list('quotes') AS il
            JOIN pragma_index_info(il.name) AS ii
            WHERE il."unique" = 1 AND il.partial = 0
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(resource, "inspect indexes", e))?;

        let mut indexes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (index, column) in rows {
            // Expression columns have no name and never match
            indexes
                .entry(index)
                .or_default()
                .push(column.unwrap_or_default());
        }

        Ok(indexes.into_values().any(|mut columns| {
            columns.sort();
            columns == KEY_COLUMNS
        }))
    }

    /// Update the usage fields of exactly the matched record
    pub async fn update_one(&self, identity: &QuoteIdentity, update: UsageUpdate) -> Result<u64> {
        let query = match identity {
            QuoteIdentity::Row(id) => sqlx::query(
                "UPDATE quotes SET is_used_in_current_cycle = ?, last_used_date = ? WHERE quote_id = ?",
            )
            .bind(i64::from(update.used))
            .bind(update.last_used_date)
            .bind(*id),
            QuoteIdentity::Key(key) => sqlx::query(
                "UPDATE quotes SET is_used_in_current_cycle = ?, last_used_date = ? \
                 WHERE quote_text = ? AND author = ?",
            )
            .bind(i64::from(update.used))
            .bind(update.last_used_date)
            .bind(key.text.clone())
            .bind(key.author.clone()),
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&self.resource(), "update usage", e))?;

        debug!(identity = %identity, rows = result.rows_affected(), "Updated quote usage");
        Ok(result.rows_affected())
    }

    /// Total, used and unused counts in the current cycle
    pub async fn count(&self) -> Result<QuoteCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN is_used_in_current_cycle = 1 THEN 1 ELSE 0 END), 0) AS used
            FROM quotes
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| classify(&self.resource(), "count", e))?;

        let total: i64 = row.get("total");
        let used: i64 = row.get("used");
        Ok(QuoteCounts {
            total,
            used,
            unused: total - used,
        })
    }

    /// Start a new rotation cycle: every quote becomes unused
    pub async fn reset_cycle(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE quotes SET is_used_in_current_cycle = 0")
            .execute(&self.pool)
            .await
            .map_err(|e| classify(&self.resource(), "reset cycle", e))?;

        info!(reset = result.rows_affected(), "Reset usage cycle");
        Ok(result.rows_affected())
    }

    /// Fetch a single quote by id
    pub async fn get(&self, quote_id: i64) -> Result<Option<QuoteRecord>> {
        let row = sqlx::query(
            r#"
            SELECT quote_id, quote_text, author, source, is_used_in_current_cycle, last_used_date
            FROM quotes
            WHERE quote_id = ?
            "#,
        )
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify(&self.resource(), "get", e))?;

        row.map(|row| record_from_row(&row))
            .transpose()
            .map_err(|e| classify(&self.resource(), "decode row", e))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl QuoteStore for SqliteQuoteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn resource(&self) -> String {
        self.path.display().to_string()
    }

    async fn load_all(&self) -> Result<Vec<QuoteRecord>> {
        let resource = self.resource();
        let rows = sqlx::query(
            r#"
            SELECT quote_id, quote_text, author, source, is_used_in_current_cycle, last_used_date
            FROM quotes
            ORDER BY quote_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify(&resource, "load all", e))?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| classify(&resource, "decode rows", e))?;

        debug!(count = records.len(), "Loaded quotes from database");
        Ok(records)
    }

    async fn insert(&self, quote: NewQuote) -> Result<InsertOutcome> {
        validate_new_quote(&quote)?;
        let resource = self.resource();

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| classify(&resource, "acquire connection", e))?;
        insert_on(&mut *conn, &quote)
            .await
            .map_err(|e| classify(&resource, "insert", e))
    }

    /// All-or-nothing: one failing row rolls back the whole batch
    async fn insert_many(&self, quotes: Vec<NewQuote>) -> Result<Vec<InsertOutcome>> {
        for quote in &quotes {
            validate_new_quote(quote)?;
        }
        let resource = self.resource();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| classify(&resource, "begin transaction", e))?;

        let mut outcomes = Vec::with_capacity(quotes.len());
        for quote in &quotes {
            match insert_on(&mut *tx, quote).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(quote = %quote.key(), "Batch insert failed; rolling back");
                    if let Err(rollback) = tx.rollback().await {
                        error!(path = %resource, error = %rollback, "Rollback failed");
                    }
                    return Err(classify(&resource, "insert batch", e));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| classify(&resource, "commit", e))?;
        debug!(count = outcomes.len(), "Inserted quote batch");
        Ok(outcomes)
    }

    async fn record_usage(&self, key: &QuoteKey, at: DateTime<Utc>) -> Result<()> {
        let rows = self
            .update_one(&QuoteIdentity::Key(key.clone()), UsageUpdate::used_at(at))
            .await?;
        if rows == 0 {
            return Err(Error::RecordNotFound(key.to_string()));
        }
        Ok(())
    }
}

/// Idempotent insert on one connection (pooled or inside a transaction)
async fn insert_on(
    conn: &mut SqliteConnection,
    quote: &NewQuote,
) -> std::result::Result<InsertOutcome, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO quotes (quote_text, author, source)
        VALUES (?, ?, ?)
        ON CONFLICT(quote_text, author) DO NOTHING
        "#,
    )
    .bind(&quote.text)
    .bind(&quote.author)
    .bind(&quote.source)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        let id = result.last_insert_rowid();
        debug!(quote_id = id, "Inserted quote");
        return Ok(InsertOutcome {
            identity: QuoteIdentity::Row(id),
            created: true,
        });
    }

    let existing: i64 =
        sqlx::query_scalar("SELECT quote_id FROM quotes WHERE quote_text = ? AND author = ?")
            .bind(&quote.text)
            .bind(&quote.author)
            .fetch_one(&mut *conn)
            .await?;

    warn!(
        quote_id = existing,
        quote = %quote.key(),
        "Quote already exists; keeping existing record"
    );
    Ok(InsertOutcome {
        identity: QuoteIdentity::Row(existing),
        created: false,
    })
}

async fn connect(db_path: &Path, mode: &str) -> Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode={}", db_path.display(), mode);
    debug!("Connecting to database: {}", db_url);

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await
        .map_err(|e| {
            error!(path = %db_path.display(), error = %e, "Failed to connect to quote database");
            Error::unavailable(db_path.display().to_string(), e)
        })?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await
        .map_err(|e| Error::unavailable(db_path.display().to_string(), e))?;

    Ok(pool)
}

async fn create_quotes_table(pool: &SqlitePool) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quotes (
            quote_id INTEGER PRIMARY KEY,
            quote_text TEXT NOT NULL,
            author TEXT NOT NULL,
            source TEXT,
            is_used_in_current_cycle INTEGER NOT NULL DEFAULT 0,
            last_used_date TEXT,
            UNIQUE(quote_text, author)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

fn record_from_row(row: &SqliteRow) -> std::result::Result<QuoteRecord, sqlx::Error> {
    // NULL flags predate the NOT NULL constraint; treat them as unused
    let used: Option<i64> = row.try_get("is_used_in_current_cycle")?;
    Ok(QuoteRecord {
        id: Some(row.try_get("quote_id")?),
        text: row.try_get("quote_text")?,
        author: row.try_get("author")?,
        source: row.try_get("source")?,
        usage: Usage::Cycle {
            used: used.unwrap_or(0) != 0,
            last_used_date: row.try_get("last_used_date")?,
        },
        extra: Map::new(),
    })
}

/// Map a sqlx failure to the store taxonomy, logging the operation
fn classify(resource: &str, operation: &str, e: sqlx::Error) -> Error {
    error!(path = %resource, operation, error = %e, "Quote database operation failed");
    match e {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => Error::malformed(resource, e),
        other => Error::unavailable(resource, other),
    }
}
