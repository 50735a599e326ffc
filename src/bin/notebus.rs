//! Host process: wires the notes pipeline from configuration and runs a demo
//! round trip over both write paths.

use std::time::Duration;

use notebus::{
    bus::events::BusEvent,
    config::load_config,
    logging::init_tracing,
    note::NoteRecord,
    pipeline::{open_store, spawn_notes_pipeline},
};

#[tokio::main]
async fn main() {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NOTES_CONFIG_PATH").ok())
        .filter(|p| !p.trim().is_empty());

    let config = load_config(path.as_deref().or(Some("notebus.toml")))
        .expect("failed to load configuration");
    init_tracing(&config.logging);

    let store = open_store(&config.store).expect("failed to open note table");
    let pipeline = spawn_notes_pipeline(store, &config)
        .await
        .expect("failed to start pipeline");
    let session = pipeline
        .api()
        .session(&config.api.api_key)
        .expect("configured api key rejected");

    let mut deliveries = pipeline.bus().subscribe();
    let ack = session
        .create_event("n1", "buy milk", "false")
        .await
        .expect("createEvent failed");
    tracing::info!(event = %ack.result, "createEvent accepted");

    // Wait out-of-band for the consumer, bounded so a dead bus cannot hang us.
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Ok(evt) = deliveries.recv().await {
            if matches!(evt, BusEvent::Delivered { .. } | BusEvent::DeadLettered { .. }) {
                break;
            }
        }
    })
    .await;

    session
        .update_note(NoteRecord::new("n1", "buy milk", true))
        .await
        .expect("updateNote failed");
    session
        .create_note(NoteRecord::new("n2", "x", false))
        .await
        .expect("createNote failed");

    for note in session.list_notes().await.expect("listNotes failed") {
        println!(
            "{}",
            serde_json::to_string(&note).unwrap_or_else(|_| format!("{note:?}"))
        );
    }

    pipeline.shutdown().await.expect("shutdown failed");
}
