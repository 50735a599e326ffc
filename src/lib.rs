//! Notes store with a direct write path and an event-routed write path.
//!
//! Both paths share one [`store::NoteStore`]. The direct path
//! ([`handler::DirectHandler`]) writes synchronously and is readable at once.
//! The event path ([`publisher::EventPublisher`]) publishes to an in-process
//! [`bus`], where a rule matching the source tag routes the event to a
//! [`consumer::NoteConsumer`] that upserts it. Publishing only confirms that
//! the bus accepted the event; the note becomes readable later.
//!
//! # Examples
//!
//! Direct path against an in-memory table:
//! ```
//! use std::sync::Arc;
//! use notebus::{
//!     handler::DirectHandler,
//!     note::NoteRecord,
//!     store::{memory::MemoryNoteStore, SharedStore},
//! };
//! use tokio::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store: SharedStore = Arc::new(MemoryNoteStore::default());
//! let handler = DirectHandler::new(store, Duration::from_secs(1));
//! handler.create(NoteRecord::new("n2", "x", false)).await.expect("create");
//! let got = handler.get_by_id("n2").await.expect("get");
//! assert_eq!(got, Some(NoteRecord::new("n2", "x", false)));
//! # }
//! ```
//!
//! Event path through the full pipeline:
//! ```no_run
//! use std::sync::Arc;
//! use notebus::{config::Config, pipeline::spawn_notes_pipeline, store::memory::MemoryNoteStore};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::default();
//! let pipeline = spawn_notes_pipeline(Arc::new(MemoryNoteStore::default()), &config)
//!     .await
//!     .expect("pipeline");
//! let session = pipeline.api().session(&config.api.api_key).expect("auth");
//! let ack = session.create_event("n1", "buy milk", "false").await.expect("publish");
//! println!("accepted {}", ack.result);
//! pipeline.shutdown().await.expect("shutdown");
//! # }
//! ```
#![deny(missing_docs)]

/// Authorized query and mutation surface.
pub mod api;
/// In-process event bus with rule routing.
pub mod bus;
/// Configuration loading.
pub mod config;
/// Bus target persisting note events.
pub mod consumer;
/// Direct CRUD handler.
pub mod handler;
/// Tracing subscriber setup.
pub mod logging;
/// Note records and validation.
pub mod note;
/// End-to-end wiring.
pub mod pipeline;
/// Event-path publisher.
pub mod publisher;
/// Note table abstraction and implementations.
pub mod store;
/// Shared identifiers and constants.
pub mod types;
