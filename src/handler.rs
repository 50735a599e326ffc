//! Direct read/write path: one store call per operation.

use thiserror::Error;
use tokio::time::Duration;
use tracing::debug;

use crate::{
    note::{NoteRecord, ValidationError},
    store::{SharedStore, StoreError, call_store},
};

/// Errors from [`DirectHandler`] calls.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request was rejected before reaching the store.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store call failed; surfaced verbatim, never retried here.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Synchronous CRUD over the shared note table.
///
/// Writes are visible to every subsequent read as soon as the call returns.
#[derive(Clone)]
pub struct DirectHandler {
    store: SharedStore,
    store_timeout: Duration,
}

impl DirectHandler {
    /// Handler over `store`, bounding every call by `store_timeout`.
    pub fn new(store: SharedStore, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    /// Looks up one note; `Ok(None)` when absent.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<NoteRecord>, HandlerError> {
        debug!(note_id = id, "get note");
        let id = id.to_string();
        Ok(call_store(&self.store, self.store_timeout, move |s| s.get(&id)).await?)
    }

    /// Every note, in no particular order.
    pub async fn list(&self) -> Result<Vec<NoteRecord>, HandlerError> {
        debug!("list notes");
        Ok(call_store(&self.store, self.store_timeout, |s| s.list()).await?)
    }

    /// Writes `note` and returns it.
    pub async fn create(&self, note: NoteRecord) -> Result<NoteRecord, HandlerError> {
        debug!(note_id = %note.id, "create note");
        self.put(note).await
    }

    /// Overwrites `note` and returns it.
    ///
    /// There is no existence check: updating an unknown id creates it.
    pub async fn update(&self, note: NoteRecord) -> Result<NoteRecord, HandlerError> {
        debug!(note_id = %note.id, "update note");
        self.put(note).await
    }

    /// Removes a note, returning it if it existed. Absent ids succeed.
    pub async fn delete(&self, id: &str) -> Result<Option<NoteRecord>, HandlerError> {
        debug!(note_id = id, "delete note");
        let id = id.to_string();
        Ok(call_store(&self.store, self.store_timeout, move |s| s.delete(&id)).await?)
    }

    async fn put(&self, note: NoteRecord) -> Result<NoteRecord, HandlerError> {
        note.validate()?;
        let written = note.clone();
        call_store(&self.store, self.store_timeout, move |s| s.put(&written)).await?;
        Ok(note)
    }
}
