//! Event-path entry point: turns a note into a bus event.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    bus::{BusError, EventEntry, handle::EventBusHandle},
    note::{NoteDetail, ValidationError},
    types::DEFAULT_DETAIL_TYPE,
};

/// Errors surfaced by [`EventPublisher::create_event`].
#[derive(Debug, Error)]
pub enum PublishError {
    /// The request was rejected before reaching the bus.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The bus did not accept the event.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The payload could not be encoded.
    #[error("failed to encode event detail: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PublishError {
    /// True when publishing again may succeed. Republishing is safe: each
    /// copy is delivered independently and the consumer upserts.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Bus(BusError::Timeout(_)))
    }
}

/// Synthetic acknowledgment returned by `createEvent`.
///
/// It only confirms the bus accepted the event. The note is not guaranteed to
/// be readable yet and may never be if delivery is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEventResult {
    /// Id of the accepted event.
    pub result: String,
}

/// Publishes note creation events under a fixed source tag.
#[derive(Clone)]
pub struct EventPublisher {
    bus: EventBusHandle,
    source: String,
    detail_type: String,
}

impl EventPublisher {
    /// Publisher tagging events with `source`.
    pub fn new(bus: EventBusHandle, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
            detail_type: DEFAULT_DETAIL_TYPE.to_string(),
        }
    }

    /// Source tag stamped on every event.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publishes a creation event for the given note fields.
    ///
    /// Fire-and-forget: returns as soon as the bus accepts the event and never
    /// reports downstream persistence failures.
    ///
    /// `completed` is forwarded as given. The consumer only accepts `true` or
    /// `false` (any case), so any other text is still accepted here but the
    /// event is dead-lettered and the note never appears.
    pub async fn create_event(
        &self,
        id: &str,
        name: &str,
        completed: &str,
    ) -> Result<CreateEventResult, PublishError> {
        self.publish(NoteDetail::new(id, name, completed)).await
    }

    /// Publishes `detail` verbatim after checking that it carries an id.
    pub async fn publish(&self, detail: NoteDetail) -> Result<CreateEventResult, PublishError> {
        if detail.id.as_deref().is_none_or(|id| id.trim().is_empty()) {
            return Err(ValidationError::MissingId.into());
        }
        let note_id = detail.id.clone().unwrap_or_default();

        let event_id = self
            .bus
            .put_event(EventEntry {
                source: self.source.clone(),
                detail_type: Some(self.detail_type.clone()),
                detail: serde_json::to_value(&detail)?,
            })
            .await?;

        info!(event_id = %event_id, note_id = %note_id, source = %self.source, "published note event");
        Ok(CreateEventResult {
            result: event_id.to_string(),
        })
    }
}
