use tempfile::TempDir;

use notebus::{
    note::NoteRecord,
    store::{NoteStore, StoreError, sqlite::SqliteNoteStore},
};

fn sorted(mut notes: Vec<NoteRecord>) -> Vec<NoteRecord> {
    notes.sort_by(|a, b| a.id.cmp(&b.id));
    notes
}

#[test]
fn sqlite_put_get_list_delete() {
    let store = SqliteNoteStore::open_in_memory("notes").expect("open");

    store.put(&NoteRecord::new("n1", "buy milk", false)).expect("put n1");
    store.put(&NoteRecord::new("n2", "x", true)).expect("put n2");
    store.put(&NoteRecord::new("n1", "buy milk", true)).expect("overwrite n1");

    assert_eq!(
        store.get("n1").expect("get"),
        Some(NoteRecord::new("n1", "buy milk", true))
    );
    assert_eq!(store.get("missing").expect("get missing"), None);
    assert_eq!(
        sorted(store.list().expect("list")),
        vec![
            NoteRecord::new("n1", "buy milk", true),
            NoteRecord::new("n2", "x", true),
        ]
    );

    assert_eq!(
        store.delete("n2").expect("delete"),
        Some(NoteRecord::new("n2", "x", true))
    );
    assert_eq!(store.delete("n2").expect("delete again"), None);
    assert_eq!(store.delete("never").expect("delete absent"), None);
    assert_eq!(store.list().expect("list").len(), 1);
}

#[test]
fn sqlite_records_survive_reopen() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("notes.db");

    let store = SqliteNoteStore::open(&db_path, "CDKNotesTable2").expect("open");
    store.put(&NoteRecord::new("n1", "a", false)).expect("put");
    store.put(&NoteRecord::new("n2", "b", true)).expect("put");
    drop(store);

    let reopened = SqliteNoteStore::open(&db_path, "CDKNotesTable2").expect("reopen");
    assert_eq!(
        sorted(reopened.list().expect("list")),
        vec![NoteRecord::new("n1", "a", false), NoteRecord::new("n2", "b", true)]
    );
}

#[test]
fn tables_in_one_database_are_isolated() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("shared.db");

    let a = SqliteNoteStore::open(&db_path, "notes_a").expect("open a");
    let b = SqliteNoteStore::open(&db_path, "notes_b").expect("open b");
    a.put(&NoteRecord::new("n1", "a", false)).expect("put");

    assert_eq!(a.table_name(), "notes_a");
    assert!(b.get("n1").expect("get").is_none());
    assert!(b.list().expect("list").is_empty());
}

#[test]
fn invalid_table_name_is_rejected_before_sql() {
    let err = SqliteNoteStore::open_in_memory("notes; DROP TABLE x")
        .err()
        .expect("must fail");
    assert!(matches!(err, StoreError::InvalidTableName(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn pipeline_over_sqlite_table_from_config() {
    use notebus::{
        bus::events::BusEvent,
        config::parse_config,
        pipeline::{open_store, spawn_notes_pipeline},
    };

    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("pipeline.db");
    let mut cfg = parse_config(&format!(
        "[store]\nbackend = \"sqlite\"\ntable_name = \"CDKNotesTable2\"\ndb_path = {:?}\n\n[api]\napi_key = \"k\"\n",
        db_path.display().to_string()
    ))
    .expect("parse");
    cfg.bus.base_delay_ms = 5;

    let store = open_store(&cfg.store).expect("open store");
    let pipeline = spawn_notes_pipeline(store, &cfg).await.expect("pipeline");
    let session = pipeline.api().session("k").expect("auth");
    let mut sub = pipeline.bus().subscribe();

    session.create_event("n1", "buy milk", "false").await.expect("createEvent");
    loop {
        let evt = tokio::time::timeout(std::time::Duration::from_secs(2), sub.recv())
            .await
            .expect("notification timeout")
            .expect("recv");
        if matches!(evt, BusEvent::Delivered { .. }) {
            break;
        }
        assert!(!matches!(evt, BusEvent::DeadLettered { .. }), "{evt:?}");
    }
    session
        .create_note(NoteRecord::new("n2", "x", false))
        .await
        .expect("createNote");
    pipeline.shutdown().await.expect("shutdown");

    let reopened = SqliteNoteStore::open(&db_path, "CDKNotesTable2").expect("reopen");
    assert_eq!(
        sorted(reopened.list().expect("list")),
        vec![
            NoteRecord::new("n1", "buy milk", false),
            NoteRecord::new("n2", "x", false),
        ]
    );
}
