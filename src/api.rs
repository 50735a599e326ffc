//! The query/mutation surface consumed by the API front door.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    handler::{DirectHandler, HandlerError},
    note::NoteRecord,
    publisher::{CreateEventResult, EventPublisher, PublishError},
};

/// Errors returned to API callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The shared API key did not match.
    #[error("unauthorized")]
    Unauthorized,
    /// A direct-path call failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// An event-path call failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Entry point gated by a fixed shared secret.
#[derive(Clone)]
pub struct NotesApi {
    handler: DirectHandler,
    publisher: EventPublisher,
    api_key: Arc<str>,
}

/// An authorized view of [`NotesApi`].
pub struct NotesSession<'a> {
    api: &'a NotesApi,
}

impl NotesApi {
    /// Builds the api over both write paths.
    pub fn new(handler: DirectHandler, publisher: EventPublisher, api_key: impl Into<String>) -> Self {
        Self {
            handler,
            publisher,
            api_key: Arc::from(api_key.into()),
        }
    }

    /// Checks `api_key` and returns a session for issuing calls.
    pub fn session(&self, api_key: &str) -> Result<NotesSession<'_>, ApiError> {
        if keys_match(self.api_key.as_bytes(), api_key.as_bytes()) {
            Ok(NotesSession { api: self })
        } else {
            tracing::warn!("rejected request with invalid api key");
            Err(ApiError::Unauthorized)
        }
    }
}

impl NotesSession<'_> {
    /// `getNoteById`.
    pub async fn get_note_by_id(&self, id: &str) -> Result<Option<NoteRecord>, ApiError> {
        Ok(self.api.handler.get_by_id(id).await?)
    }

    /// `listNotes`.
    pub async fn list_notes(&self) -> Result<Vec<NoteRecord>, ApiError> {
        Ok(self.api.handler.list().await?)
    }

    /// `createNote`, the direct path.
    pub async fn create_note(&self, note: NoteRecord) -> Result<NoteRecord, ApiError> {
        Ok(self.api.handler.create(note).await?)
    }

    /// `updateNote`.
    pub async fn update_note(&self, note: NoteRecord) -> Result<NoteRecord, ApiError> {
        Ok(self.api.handler.update(note).await?)
    }

    /// `deleteNote`.
    pub async fn delete_note(&self, id: &str) -> Result<Option<NoteRecord>, ApiError> {
        Ok(self.api.handler.delete(id).await?)
    }

    /// `createEvent`, the event path.
    ///
    /// Success means the event was accepted for delivery, not that the note
    /// is stored. It may not appear in `list_notes` for some time.
    pub async fn create_event(
        &self,
        id: &str,
        name: &str,
        completed: &str,
    ) -> Result<CreateEventResult, ApiError> {
        Ok(self.api.publisher.create_event(id, name, completed).await?)
    }
}

fn keys_match(expected: &[u8], given: &[u8]) -> bool {
    if expected.len() != given.len() {
        return false;
    }
    expected
        .iter()
        .zip(given)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
