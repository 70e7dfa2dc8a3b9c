//! Persistence operations for the dedup store.
//!
//! All admissions go through [`DedupStore::admit_batch`], which inserts one
//! record per keyed event inside a single transaction. A key conflict is
//! reported per key as [`AdmitOutcome::AlreadyExists`]; any other failure
//! rolls back the whole batch.

use aggregator_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use aggregator_types::{Event, EventKey};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::record::{AdmitOutcome, DedupRecord};

/// Durable keyed set of admitted events.
///
/// Cloning is cheap and shares the underlying pool. All methods block on
/// SQLite I/O; async callers should run them on the blocking thread pool.
#[derive(Clone)]
pub struct DedupStore {
    pool: DbPool,
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("pool_max_size", &self.pool.max_size())
            .finish()
    }
}

impl DedupStore {
    /// Wraps an existing connection pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `path`.
    ///
    /// The schema is not touched; call [`DedupStore::ensure_initialized`]
    /// before admitting anything.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the pool cannot be created.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, StoreError> {
        tracing::info!(path, "opening dedup store");
        Ok(Self::new(create_pool(path, settings)?))
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Creates the schema if it does not exist yet. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Pool` if no connection is available and
    /// `StoreError::Migration` if the schema cannot be created.
    pub fn ensure_initialized(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let applied = run_migrations(&conn)?;
        if applied > 0 {
            tracing::info!(count = applied, "applied dedup store migrations");
        }
        Ok(())
    }

    /// Admits a batch of events in one transaction and returns the subset
    /// that was new.
    ///
    /// Events missing a topic or event id are skipped. Events whose key is
    /// already stored, including keys repeated earlier in the same batch,
    /// are left out of the result. Every admitted record in the batch shares
    /// one `accepted_at` timestamp.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on any failure other than a key conflict. In that
    /// case nothing from the batch has been committed.
    pub fn admit_batch(&self, events: &[Event]) -> Result<Vec<Event>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let accepted_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut accepted = Vec::with_capacity(events.len());
        for event in events {
            let Some(key) = event.key() else {
                tracing::debug!(
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "skipping event without a complete dedup key"
                );
                continue;
            };

            match admit_key(&tx, &key, &accepted_at)? {
                AdmitOutcome::Inserted => accepted.push(event.clone()),
                AdmitOutcome::AlreadyExists => {
                    tracing::trace!(%key, "duplicate event");
                }
            }
        }

        // Dropping `tx` on an early return above rolls the batch back.
        tx.commit()?;

        Ok(accepted)
    }

    /// Counts the records currently stored.
    ///
    /// Returns `0` if the schema has not been created yet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on any other database failure.
    pub fn initial_unique_count(&self) -> Result<u64, StoreError> {
        let conn = self.pool.get()?;
        match count_records(&conn) {
            Ok(count) => {
                tracing::info!(count, "loaded durable unique event count");
                Ok(count)
            }
            Err(e) if is_missing_table(&e) => {
                tracing::warn!("dedup table not found, starting from an empty record set");
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Looks up the stored record for `key`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on database failure.
    pub fn record(&self, key: &EventKey) -> Result<Option<DedupRecord>, StoreError> {
        let conn = self.pool.get()?;
        let record = conn
            .query_row(
                "SELECT topic, event_id, accepted_at FROM processed_events
                 WHERE topic = ?1 AND event_id = ?2",
                params![key.topic, key.event_id],
                |row| {
                    Ok(DedupRecord {
                        topic: row.get(0)?,
                        event_id: row.get(1)?,
                        accepted_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

/// Attempts to insert the record for a single key.
///
/// A uniqueness conflict yields [`AdmitOutcome::AlreadyExists`] rather than
/// an error, so the surrounding transaction stays usable.
///
/// # Errors
///
/// Returns `StoreError::Database` on any other SQL failure.
pub fn admit_key(
    conn: &Connection,
    key: &EventKey,
    accepted_at: &str,
) -> Result<AdmitOutcome, StoreError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO processed_events (topic, event_id, accepted_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (topic, event_id) DO NOTHING",
    )?;
    let changed = stmt.execute(params![key.topic, key.event_id, accepted_at])?;

    Ok(if changed == 1 {
        AdmitOutcome::Inserted
    } else {
        AdmitOutcome::AlreadyExists
    })
}

fn count_records(conn: &Connection) -> Result<u64, rusqlite::Error> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM processed_events", [], |row| {
        row.get(0)
    })?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.starts_with("no such table")
    )
}
