//! Usage recorder against both backends

use dstoic_common::store::{
    BlobStore, DocumentQuoteStore, MemoryBlobStore, SqliteQuoteStore, WritePrecondition,
    DEFAULT_BLOB_NAME,
};
use dstoic_common::{NewQuote, QuoteKey, QuoteStore, RecordOutcome, UsageRecorder};
use std::sync::Arc;
use tempfile::TempDir;

const DOCUMENT: &str = r#"{"quotes": [
    {"text": "Begin at once to live.", "author": "Seneca", "last_used_timestamp": 1000},
    {"text": "It is not death that a man should fear.", "author": "Marcus Aurelius", "last_used_timestamp": 2000}
]}"#;

async fn document_store() -> DocumentQuoteStore<Arc<MemoryBlobStore>> {
    let blobs = Arc::new(MemoryBlobStore::new());
    blobs
        .write(DEFAULT_BLOB_NAME, DOCUMENT.as_bytes().to_vec(), WritePrecondition::Any)
        .await
        .unwrap();
    DocumentQuoteStore::new(blobs, DEFAULT_BLOB_NAME)
}

#[tokio::test]
async fn test_recorded_value_increases_and_is_not_before_call() {
    let store = document_store().await;
    let key = QuoteKey::new("Begin at once to live.", "Seneca");
    let before = store.load_all().await.unwrap()[0].usage.ordering_value();
    let call_start = chrono::Utc::now().timestamp();

    let outcome = UsageRecorder::new().record(&store, &key).await;

    let at = match outcome {
        RecordOutcome::Recorded { at } => at,
        other => panic!("expected Recorded, got {other:?}"),
    };
    assert!(at.timestamp() >= call_start);

    let after = store.load_all().await.unwrap()[0].usage.ordering_value();
    assert!(after > before);
    assert!(after >= call_start);
}

#[tokio::test]
async fn test_missing_record_reports_not_found() {
    let store = document_store().await;
    let outcome = UsageRecorder::new()
        .record(&store, &QuoteKey::new("Gone", "Nobody"))
        .await;
    assert_eq!(outcome, RecordOutcome::NotFound);
}

#[tokio::test]
async fn test_unavailable_store_reports_failure() {
    let store = document_store().await;
    store.blob_store().set_unavailable(true);

    let outcome = UsageRecorder::new()
        .record(&store, &QuoteKey::new("Begin at once to live.", "Seneca"))
        .await;
    assert!(matches!(outcome, RecordOutcome::Failed(_)));
    assert!(!outcome.is_recorded());
}

#[tokio::test]
async fn test_sqlite_recording_through_trait_object() {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteQuoteStore::create(&dir.path().join("quotes.db"))
        .await
        .unwrap();
    sqlite
        .insert(NewQuote::new("Amor fati.", "Marcus Aurelius", None))
        .await
        .unwrap();
    let store: Arc<dyn QuoteStore> = Arc::new(sqlite);

    let outcome = UsageRecorder::new()
        .record(store.as_ref(), &QuoteKey::new("Amor fati.", "Marcus Aurelius"))
        .await;
    assert!(outcome.is_recorded());

    let records = store.load_all().await.unwrap();
    assert!(records[0].usage.is_used());

    let missing = UsageRecorder::new()
        .record(store.as_ref(), &QuoteKey::new("Amor fati.", "Nietzsche"))
        .await;
    assert_eq!(missing, RecordOutcome::NotFound);
}
