//! Wiring of store, bus, routing rule, consumer, publisher, and api.

use std::sync::Arc;

use crate::{
    api::NotesApi,
    bus::{
        BusError, EventPattern, Rule,
        handle::{EventBusHandle, spawn_event_bus},
    },
    config::{Config, StoreBackend, StoreConfig},
    consumer::NoteConsumer,
    handler::DirectHandler,
    publisher::EventPublisher,
    store::{SharedStore, StoreResult, memory::MemoryNoteStore, sqlite::SqliteNoteStore},
    types::NOTE_EVENTS_RULE,
};

/// A running notes system.
pub struct NotesPipeline {
    api: NotesApi,
    bus: EventBusHandle,
    store: SharedStore,
}

/// Opens the table described by `config`.
pub fn open_store(config: &StoreConfig) -> StoreResult<SharedStore> {
    let store: SharedStore = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryNoteStore::new(config.table_name.clone())),
        StoreBackend::Sqlite => Arc::new(SqliteNoteStore::open(&config.db_path, &config.table_name)?),
    };
    Ok(store)
}

/// Starts a bus, routes `config.event_source` events to a [`NoteConsumer`],
/// and returns an api whose both write paths share `store`.
pub async fn spawn_notes_pipeline(
    store: SharedStore,
    config: &Config,
) -> Result<NotesPipeline, BusError> {
    let bus = spawn_event_bus(config.bus.clone());
    let consumer = Arc::new(NoteConsumer::new(Arc::clone(&store), config.store.timeout()));

    bus.put_rule(
        Rule::new(NOTE_EVENTS_RULE, EventPattern::source(config.event_source.clone()))
            .with_target(consumer),
    )
    .await?;

    let handler = DirectHandler::new(Arc::clone(&store), config.store.timeout());
    let publisher = EventPublisher::new(bus.clone(), config.event_source.clone());

    tracing::info!(
        table = store.table_name(),
        bus = bus.name(),
        source = publisher.source(),
        "notes pipeline ready"
    );
    let api = NotesApi::new(handler, publisher, config.api.api_key.clone());

    Ok(NotesPipeline { api, bus, store })
}

impl NotesPipeline {
    /// The api surface.
    pub fn api(&self) -> &NotesApi {
        &self.api
    }

    /// The underlying bus, for subscribing to delivery notifications.
    pub fn bus(&self) -> &EventBusHandle {
        &self.bus
    }

    /// The shared table.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Stops the bus after in-flight deliveries finish.
    pub async fn shutdown(&self) -> Result<(), BusError> {
        self.bus.shutdown().await
    }
}
