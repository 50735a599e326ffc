//! Bus target that persists note creation events.

use async_trait::async_trait;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::{
    bus::{Event, EventTarget, TargetError},
    note::NoteDetail,
    store::{SharedStore, call_store},
};

/// Target name reported in bus notifications.
pub const NOTE_CONSUMER_NAME: &str = "note-consumer";

/// Writes the `detail` of each delivered event into the store.
///
/// The write is an upsert keyed by note id, so redelivering the same event
/// leaves exactly one record. A stale redelivery can still overwrite a newer
/// direct-path update; writes resolve last-write-wins.
pub struct NoteConsumer {
    store: SharedStore,
    store_timeout: Duration,
}

impl NoteConsumer {
    /// Creates a consumer writing to `store`, bounding each write by `store_timeout`.
    pub fn new(store: SharedStore, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }
}

#[async_trait]
impl EventTarget for NoteConsumer {
    fn name(&self) -> &str {
        NOTE_CONSUMER_NAME
    }

    async fn invoke(&self, event: &Event) -> Result<(), TargetError> {
        let record = NoteDetail::from_value(&event.detail)
            .and_then(NoteDetail::into_record)
            .map_err(|err| {
                warn!(event_id = %event.id, error = %err, "rejecting malformed note event");
                TargetError::permanent(err.to_string())
            })?;

        let note_id = record.id.clone();
        call_store(&self.store, self.store_timeout, move |store| store.put(&record))
            .await
            .map_err(|err| {
                error!(
                    event_id = %event.id,
                    note_id = %note_id,
                    table = self.store.table_name(),
                    error = %err,
                    "failed to persist note event"
                );
                if err.is_transient() {
                    TargetError::retryable(err.to_string())
                } else {
                    TargetError::permanent(err.to_string())
                }
            })?;

        info!(event_id = %event.id, note_id = %note_id, "persisted note from event");
        Ok(())
    }
}
