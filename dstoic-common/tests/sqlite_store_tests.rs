//! Integration tests for the relational quote store
//!
//! Each test works on its own database file in a temporary directory.

use chrono::{Duration, Utc};
use dstoic_common::store::{QuoteCounts, SqliteQuoteStore, UsageUpdate};
use dstoic_common::{Error, NewQuote, QuoteIdentity, QuoteKey, QuoteStore, Usage};
use std::path::PathBuf;
use tempfile::TempDir;

fn db_path(dir: &TempDir) -> PathBuf {
    dir.path().join("quotes.db")
}

async fn seeded_store(dir: &TempDir) -> SqliteQuoteStore {
    let store = SqliteQuoteStore::create(&db_path(dir)).await.unwrap();
    store
        .insert_many(vec![
            NewQuote::new(
                "Waste no more time arguing about what a good man should be. Be one.",
                "Marcus Aurelius",
                Some("Meditations".to_string()),
            ),
            NewQuote::new("We suffer more often in imagination than in reality.", "Seneca", None),
            NewQuote::new("No man is free who is not master of himself.", "Epictetus", None),
        ])
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_open_missing_database_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let result = SqliteQuoteStore::open(&db_path(&dir)).await;
    assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
    // open must not create the file
    assert!(!db_path(&dir).exists());
}

#[tokio::test]
async fn test_open_without_quotes_table_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    sqlx::query("CREATE TABLE unrelated (id INTEGER PRIMARY KEY)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let result = SqliteQuoteStore::open(&path).await;
    assert!(matches!(result, Err(Error::MalformedState { .. })));
}

#[tokio::test]
async fn test_open_with_missing_columns_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    sqlx::query("CREATE TABLE quotes (quote_id INTEGER PRIMARY KEY, quote_text TEXT, author TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    match SqliteQuoteStore::open(&path).await {
        Err(Error::MalformedState { reason, .. }) => {
            assert!(reason.contains("is_used_in_current_cycle"), "reason: {}", reason);
        }
        Err(other) => panic!("expected MalformedState, got {other:?}"),
        Ok(_) => panic!("expected MalformedState, got a store"),
    }
}

async fn legacy_database(path: &std::path::Path, statements: &[&str]) {
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    for statement in statements {
        sqlx::query(statement).execute(&pool).await.unwrap();
    }
    pool.close().await;
}

const TABLE_WITHOUT_UNIQUE: &str = "CREATE TABLE quotes (quote_id INTEGER PRIMARY KEY, \
     quote_text TEXT NOT NULL, author TEXT NOT NULL, source TEXT, \
     is_used_in_current_cycle INTEGER NOT NULL DEFAULT 0, last_used_date TEXT)";

#[tokio::test]
async fn test_open_without_unique_key_is_malformed() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    legacy_database(&path, &[TABLE_WITHOUT_UNIQUE]).await;

    match SqliteQuoteStore::open(&path).await {
        Err(Error::MalformedState { reason, .. }) => {
            assert!(reason.contains("UNIQUE(quote_text, author)"), "reason: {}", reason);
        }
        Err(other) => panic!("expected MalformedState, got {other:?}"),
        Ok(_) => panic!("expected MalformedState, got a store"),
    }
}

#[tokio::test]
async fn test_open_rejects_unique_index_on_other_columns() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    legacy_database(
        &path,
        &[
            TABLE_WITHOUT_UNIQUE,
            "CREATE UNIQUE INDEX idx_text ON quotes (quote_text)",
            "CREATE UNIQUE INDEX idx_text_author_source ON quotes (quote_text, author, source)",
        ],
    )
    .await;

    assert!(matches!(
        SqliteQuoteStore::open(&path).await,
        Err(Error::MalformedState { .. })
    ));
}

#[tokio::test]
async fn test_open_accepts_separate_unique_index() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);
    legacy_database(
        &path,
        &[
            TABLE_WITHOUT_UNIQUE,
            "CREATE UNIQUE INDEX idx_quote_key ON quotes (author, quote_text)",
        ],
    )
    .await;

    let store = SqliteQuoteStore::open(&path).await.unwrap();
    let first = store
        .insert(NewQuote::new("Amor fati.", "Nietzsche", None))
        .await
        .unwrap();
    let second = store
        .insert(NewQuote::new("Amor fati.", "Nietzsche", None))
        .await
        .unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.identity, second.identity);
}

#[tokio::test]
async fn test_insert_many_rolls_back_on_failure() {
    let dir = TempDir::new().unwrap();
    let store = SqliteQuoteStore::create(&db_path(&dir)).await.unwrap();
    sqlx::query(
        "CREATE TRIGGER reject_rejected BEFORE INSERT ON quotes \
         WHEN NEW.quote_text = 'rejected' BEGIN SELECT RAISE(ABORT, 'row rejected'); END",
    )
    .execute(store.pool())
    .await
    .unwrap();

    let result = store
        .insert_many(vec![
            NewQuote::new("First", "A", None),
            NewQuote::new("rejected", "B", None),
            NewQuote::new("Third", "C", None),
        ])
        .await;

    assert!(matches!(result, Err(Error::StoreUnavailable { .. })));
    assert_eq!(store.count().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_create_then_open() {
    let dir = TempDir::new().unwrap();
    let created = seeded_store(&dir).await;
    created.close().await;

    let store = SqliteQuoteStore::open(&db_path(&dir)).await.unwrap();
    let records = store.load_all().await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.id.is_some()));
    assert!(records.iter().all(|r| !r.usage.is_used()));
    assert_eq!(records[0].source.as_deref(), Some("Meditations"));
    assert_eq!(records[1].source, None);
}

#[tokio::test]
async fn test_insert_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let before = store.count().await.unwrap();

    let first = store
        .insert(NewQuote::new("Memento mori.", "Unknown", None))
        .await
        .unwrap();
    assert!(first.created);

    let second = store
        .insert(NewQuote::new("Memento mori.", "Unknown", Some("elsewhere".to_string())))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(first.identity, second.identity);

    let after = store.count().await.unwrap();
    assert_eq!(after.total, before.total + 1);
}

#[tokio::test]
async fn test_insert_rejects_empty_fields() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;

    let result = store.insert(NewQuote::new("  ", "Seneca", None)).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    let result = store.insert(NewQuote::new("Text", "", None)).await;
    assert!(matches!(result, Err(Error::InvalidInput(_))));
    assert_eq!(store.count().await.unwrap().total, 3);
}

#[tokio::test]
async fn test_record_usage_marks_only_target() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let key = QuoteKey::new("We suffer more often in imagination than in reality.", "Seneca");
    let at = Utc::now();

    store.record_usage(&key, at).await.unwrap();

    let records = store.load_all().await.unwrap();
    for record in &records {
        if record.matches(&key) {
            assert_eq!(record.usage.ordering_value(), 1);
            match &record.usage {
                Usage::Cycle { used, last_used_date } => {
                    assert!(*used);
                    assert_eq!(last_used_date.as_deref(), Some(at.to_rfc3339().as_str()));
                }
                other => panic!("unexpected usage {other:?}"),
            }
        } else {
            assert_eq!(record.usage.ordering_value(), 0);
        }
    }

    assert_eq!(
        store.count().await.unwrap(),
        QuoteCounts { total: 3, used: 1, unused: 2 }
    );
}

#[tokio::test]
async fn test_record_usage_unknown_key_is_not_found() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;

    let result = store
        .record_usage(&QuoteKey::new("Not in the store", "Nobody"), Utc::now())
        .await;
    assert!(matches!(result, Err(Error::RecordNotFound(_))));
    assert_eq!(store.count().await.unwrap().used, 0);
}

#[tokio::test]
async fn test_update_one_by_row_id() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    let target = store.load_all().await.unwrap()[2].clone();
    let id = target.id.unwrap();

    let rows = store
        .update_one(
            &QuoteIdentity::Row(id),
            UsageUpdate::used_at(Utc::now() - Duration::days(1)),
        )
        .await
        .unwrap();
    assert_eq!(rows, 1);

    let fetched = store.get(id).await.unwrap().unwrap();
    assert!(fetched.usage.is_used());
    assert_eq!(fetched.text, target.text);

    assert_eq!(
        store
            .update_one(&QuoteIdentity::Row(9999), UsageUpdate::used_at(Utc::now()))
            .await
            .unwrap(),
        0
    );
    assert!(store.get(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_reset_cycle_clears_every_flag() {
    let dir = TempDir::new().unwrap();
    let store = seeded_store(&dir).await;
    for record in store.load_all().await.unwrap() {
        store.record_usage(&record.key(), Utc::now()).await.unwrap();
    }
    assert_eq!(store.count().await.unwrap().unused, 0);

    let reset = store.reset_cycle().await.unwrap();
    assert_eq!(reset, 3);

    let counts = store.count().await.unwrap();
    assert_eq!(counts.used, 0);
    assert_eq!(counts.unused, counts.total);
}

#[tokio::test]
async fn test_null_usage_flag_reads_as_unused() {
    let dir = TempDir::new().unwrap();
    let path = db_path(&dir);

    // Legacy table without the NOT NULL constraint
    let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display()))
        .await
        .unwrap();
    sqlx::query(
        "CREATE TABLE quotes (quote_id INTEGER PRIMARY KEY, quote_text TEXT NOT NULL, \
         author TEXT NOT NULL, source TEXT, is_used_in_current_cycle INTEGER, \
         last_used_date TEXT, UNIQUE(quote_text, author))",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO quotes (quote_text, author) VALUES ('Amor fati.', 'Nietzsche')")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let store = SqliteQuoteStore::open(&path).await.unwrap();
    let records = store.load_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].usage.ordering_value(), 0);
}
