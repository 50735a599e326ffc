//! Note table abstraction and its in-memory and SQLite implementations.

use std::sync::Arc;

use thiserror::Error;
use tokio::time::Duration;

use crate::{note::NoteRecord, types::NoteId};

/// Lock-protected in-memory table.
pub mod memory;
/// SQLite-backed table.
pub mod sqlite;

/// Failures surfaced by a [`NoteStore`]. "Not found" is never an error.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The call did not return within the configured bound.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    /// The table could not be reached (poisoned lock, failed worker, injected fault).
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The configured table name is not a plain identifier.
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    /// A stored row could not be decoded.
    #[error("corrupt row for note {id:?}: {reason}")]
    Corrupt {
        /// Key of the unreadable row.
        id: NoteId,
        /// Decoder message.
        reason: String,
    },
}

impl StoreError {
    /// True when the same call may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_) | Self::Timeout(_) | Self::Unavailable(_)
        )
    }
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// A single logical key-value table of notes keyed by `id`.
///
/// Every call is atomic for its key. There are no cross-key transactions and
/// `put` is an upsert, so concurrent writers to one id resolve last-write-wins.
pub trait NoteStore: Send + Sync {
    /// Name of the table this handle addresses.
    fn table_name(&self) -> &str;
    /// Point lookup; `Ok(None)` when absent.
    fn get(&self, id: &str) -> StoreResult<Option<NoteRecord>>;
    /// Full scan in unspecified order.
    fn list(&self) -> StoreResult<Vec<NoteRecord>>;
    /// Inserts or overwrites the record with the same `id`.
    fn put(&self, record: &NoteRecord) -> StoreResult<()>;
    /// Removes `id`, returning the removed record; absent ids are a no-op.
    fn delete(&self, id: &str) -> StoreResult<Option<NoteRecord>>;
}

/// Shared handle injected into handlers and consumers.
pub type SharedStore = Arc<dyn NoteStore>;

/// Runs one store call on the blocking pool, bounded by `timeout`.
///
/// A call that times out may still complete in the background; callers must
/// treat it as failed and decide themselves whether to retry.
pub async fn call_store<T, F>(store: &SharedStore, timeout: Duration, f: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn NoteStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    let task = tokio::task::spawn_blocking(move || f(store.as_ref()));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(res)) => res,
        Ok(Err(e)) => Err(StoreError::Unavailable(format!("join error: {e}"))),
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}

/// Checks that `name` can be spliced into SQL as a bare identifier.
pub fn validate_table_name(name: &str) -> StoreResult<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(StoreError::InvalidTableName(name.to_string()))
    }
}
