//! Durable record and admission outcome types.

use serde::Serialize;

/// Durable projection of an admitted event.
///
/// Created exactly once per distinct key and never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupRecord {
    /// Topic half of the key.
    pub topic: String,
    /// Event id half of the key.
    pub event_id: String,
    /// RFC 3339 timestamp of the batch that admitted the key.
    pub accepted_at: String,
}

/// Result of attempting to admit a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// The key was new and its record has been written.
    Inserted,
    /// A record for the key already existed; nothing was written.
    AlreadyExists,
}
