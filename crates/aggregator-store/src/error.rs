//! Error types for the dedup store.

/// Errors that can occur during dedup store operations.
///
/// A duplicate key is never an error; see [`crate::AdmitOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The connection pool could not be created.
    #[error("failed to open dedup store: {0}")]
    Open(#[from] aggregator_db::PoolError),

    /// No pooled connection could be obtained.
    #[error("dedup store connection unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    /// A database operation failed.
    #[error("dedup store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The schema could not be created or upgraded.
    #[error("dedup store schema initialization failed: {0}")]
    Migration(#[from] aggregator_db::MigrationError),
}
