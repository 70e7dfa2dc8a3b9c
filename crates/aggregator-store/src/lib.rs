//! Dedup store for the event aggregator.
//!
//! Records every admitted `(topic, event_id)` key in SQLite under a
//! uniqueness constraint. The store is the single source of truth for
//! "has this event been seen before", and its contents survive restarts.
//!
//! # Usage
//!
//! ```rust,ignore
//! use aggregator_store::DedupStore;
//!
//! let store = DedupStore::open("data/dedup_store.db", Default::default())?;
//! store.ensure_initialized()?;
//! let fresh = store.admit_batch(&events)?;
//! ```

mod error;
mod record;
mod store;

pub use error::StoreError;
pub use record::{AdmitOutcome, DedupRecord};
pub use store::{admit_key, DedupStore};

#[cfg(test)]
mod tests;
