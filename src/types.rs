//! Shared identifiers and well-known names.

use uuid::Uuid;

/// Client-assigned note identifier, the store's primary key.
pub type NoteId = String;
/// Bus-assigned identifier of an accepted event.
pub type EventId = Uuid;

/// Source tag stamped on every event produced by the note publisher.
pub const DEFAULT_EVENT_SOURCE: &str = "eru-appsync-events";
/// Detail type stamped on note creation events.
pub const DEFAULT_DETAIL_TYPE: &str = "NoteCreated";
/// Name of the bus the pipeline publishes to.
pub const DEFAULT_BUS_NAME: &str = "default";
/// Table addressed when no table name is configured.
pub const DEFAULT_TABLE_NAME: &str = "notes";
/// Name of the rule routing note events to the consumer.
pub const NOTE_EVENTS_RULE: &str = "note-events";
