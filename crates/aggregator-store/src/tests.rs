//! Unit tests for the dedup store.

use aggregator_db::DbRuntimeSettings;
use aggregator_types::{Event, EventKey};
use tempfile::TempDir;

use crate::error::StoreError;
use crate::record::AdmitOutcome;
use crate::store::{admit_key, DedupStore};

/// Opens an initialized store in a fresh temporary directory.
fn test_store() -> (TempDir, DedupStore) {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = open_at(&dir);
    store.ensure_initialized().expect("schema should initialize");
    (dir, store)
}

fn open_at(dir: &TempDir) -> DedupStore {
    let path = dir.path().join("dedup_store.db");
    DedupStore::open(
        path.to_str().expect("temp path should be utf-8"),
        DbRuntimeSettings::default(),
    )
    .expect("store should open")
}

fn event(topic: &str, id: &str) -> Event {
    Event::new(topic, id, "2025-01-01T00:00:00Z", "unit-test")
}

fn key(topic: &str, id: &str) -> EventKey {
    EventKey {
        topic: topic.to_string(),
        event_id: id.to_string(),
    }
}

fn stored_count(store: &DedupStore) -> i64 {
    let conn = store.pool().get().expect("should get connection");
    conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| row.get(0))
        .expect("should count records")
}

// ── admit_batch ──────────────────────────────────────────────────────

#[test]
fn admit_batch_accepts_new_keys() {
    let (_dir, store) = test_store();

    let accepted = store
        .admit_batch(&[event("t", "e1"), event("t", "e2"), event("u", "e1")])
        .expect("admit should succeed");

    assert_eq!(accepted.len(), 3);
    assert_eq!(stored_count(&store), 3);
}

#[test]
fn admit_batch_excludes_previously_stored_keys() {
    let (_dir, store) = test_store();
    store
        .admit_batch(&[event("t", "e1")])
        .expect("first admit should succeed");

    let accepted = store
        .admit_batch(&[event("t", "e1"), event("t", "e2")])
        .expect("second admit should succeed");

    let ids: Vec<&str> = accepted.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids, vec!["e2"]);
    assert_eq!(stored_count(&store), 2);
}

#[test]
fn admit_batch_deduplicates_within_one_batch() {
    let (_dir, store) = test_store();

    let accepted = store
        .admit_batch(&[event("t", "e1"), event("t", "e1"), event("t", "e1")])
        .expect("admit should succeed");

    assert_eq!(accepted.len(), 1);
    assert_eq!(stored_count(&store), 1);
}

#[test]
fn admit_batch_skips_events_without_key() {
    let (_dir, store) = test_store();

    let accepted = store
        .admit_batch(&[event("", "e1"), event("t", ""), event("t", "e1")])
        .expect("admit should succeed");

    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].event_id, "e1");
    assert_eq!(stored_count(&store), 1);
}

#[test]
fn admit_batch_preserves_input_order() {
    let (_dir, store) = test_store();
    let batch: Vec<Event> = (0..10).map(|i| event("t", &format!("e{i}"))).collect();

    let accepted = store.admit_batch(&batch).expect("admit should succeed");

    assert_eq!(accepted, batch);
}

#[test]
fn admit_batch_empty_is_noop() {
    let (_dir, store) = test_store();
    let accepted = store.admit_batch(&[]).expect("empty admit should succeed");
    assert!(accepted.is_empty());
}

#[test]
fn resubmission_never_creates_second_record() {
    let (_dir, store) = test_store();

    for _ in 0..5 {
        store
            .admit_batch(&[event("t", "e1")])
            .expect("admit should succeed");
    }

    assert_eq!(stored_count(&store), 1);
    assert_eq!(store.initial_unique_count().expect("count"), 1);
}

#[test]
fn admit_batch_rolls_back_on_store_failure() {
    let (_dir, store) = test_store();
    {
        let conn = store.pool().get().expect("should get connection");
        conn.execute_batch(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON processed_events
             WHEN NEW.event_id = 'poison'
             BEGIN SELECT RAISE(ABORT, 'poisoned event'); END;",
        )
        .expect("should create trigger");
    }

    let err = store
        .admit_batch(&[event("t", "e1"), event("t", "poison"), event("t", "e2")])
        .expect_err("poisoned batch should fail");
    assert!(matches!(err, StoreError::Database(_)), "got {err:?}");

    assert_eq!(stored_count(&store), 0, "no part of the batch may be committed");
}

#[test]
fn admit_batch_fails_without_schema() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = open_at(&dir);

    let err = store
        .admit_batch(&[event("t", "e1")])
        .expect_err("admission without schema should fail");
    assert!(matches!(err, StoreError::Database(_)), "got {err:?}");
}

#[test]
fn batch_records_share_accepted_at() {
    let (_dir, store) = test_store();
    store
        .admit_batch(&[event("t", "e1"), event("t", "e2")])
        .expect("admit should succeed");

    let first = store.record(&key("t", "e1")).expect("lookup").expect("record");
    let second = store.record(&key("t", "e2")).expect("lookup").expect("record");
    assert_eq!(first.accepted_at, second.accepted_at);
    assert!(chrono::DateTime::parse_from_rfc3339(&first.accepted_at).is_ok());
}

#[test]
fn duplicate_does_not_touch_original_record() {
    let (_dir, store) = test_store();
    store.admit_batch(&[event("t", "e1")]).expect("admit");
    let original = store.record(&key("t", "e1")).expect("lookup").expect("record");

    std::thread::sleep(std::time::Duration::from_millis(5));
    store.admit_batch(&[event("t", "e1")]).expect("admit");

    let after = store.record(&key("t", "e1")).expect("lookup").expect("record");
    assert_eq!(original, after);
}

// ── admit_key ────────────────────────────────────────────────────────

#[test]
fn admit_key_reports_outcome_per_key() {
    let (_dir, store) = test_store();
    let conn = store.pool().get().expect("should get connection");

    let first = admit_key(&conn, &key("t", "e1"), "ts").expect("insert");
    let second = admit_key(&conn, &key("t", "e1"), "ts").expect("conflict is not an error");

    assert_eq!(first, AdmitOutcome::Inserted);
    assert_eq!(second, AdmitOutcome::AlreadyExists);
}

// ── initialization and counts ────────────────────────────────────────

#[test]
fn ensure_initialized_is_idempotent() {
    let (_dir, store) = test_store();
    store.ensure_initialized().expect("second call should succeed");
    store.ensure_initialized().expect("third call should succeed");
}

#[test]
fn initial_count_is_zero_before_schema_exists() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let store = open_at(&dir);
    assert_eq!(store.initial_unique_count().expect("count"), 0);
}

#[test]
fn initial_count_survives_reopen() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    {
        let store = open_at(&dir);
        store.ensure_initialized().expect("init");
        store
            .admit_batch(&[event("t", "e1"), event("t", "e2"), event("u", "e1")])
            .expect("admit");
    }

    let reopened = open_at(&dir);
    reopened.ensure_initialized().expect("re-init");
    assert_eq!(reopened.initial_unique_count().expect("count"), 3);

    let accepted = reopened
        .admit_batch(&[event("t", "e1"), event("t", "e3")])
        .expect("admit after reopen");
    assert_eq!(accepted.len(), 1, "keys from the previous run stay duplicates");
}

#[test]
fn record_lookup_returns_none_for_unknown_key() {
    let (_dir, store) = test_store();
    assert_eq!(store.record(&key("t", "missing")).expect("lookup"), None);
}
