//! SQLite-backed note table.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::note::NoteRecord;

use super::{NoteStore, StoreError, StoreResult, validate_table_name};

/// SQLite implementation of [`crate::store::NoteStore`].
pub struct SqliteNoteStore {
    conn: Mutex<Connection>,
    table: String,
}

impl SqliteNoteStore {
    /// Opens or creates the database at `path` and ensures `table` exists.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>, table: &str) -> StoreResult<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path)?;
        Self::init_connection(conn, table)
    }

    /// Opens an in-memory database holding `table`.
    pub fn open_in_memory(table: &str) -> StoreResult<Self> {
        validate_table_name(table)?;
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn, table)
    }

    fn init_connection(conn: Connection, table: &str) -> StoreResult<Self> {
        conn.execute_batch(&include_str!("schema.sql").replace("{table}", table))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        tracing::debug!(table, "opened sqlite note table");
        Ok(Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
        f(&conn)
    }
}

impl NoteStore for SqliteNoteStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn get(&self, id: &str) -> StoreResult<Option<NoteRecord>> {
        let sql = format!("SELECT id, name, completed FROM {} WHERE id = ?1", self.table);
        self.with_conn(|conn| {
            let row = conn
                .query_row(&sql, params![id], read_row)
                .optional()?;
            row.transpose()
        })
    }

    fn list(&self) -> StoreResult<Vec<NoteRecord>> {
        let sql = format!("SELECT id, name, completed FROM {} ORDER BY id", self.table);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], read_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row??);
            }
            Ok(out)
        })
    }

    fn put(&self, record: &NoteRecord) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO {} (id, name, completed) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, completed = excluded.completed",
            self.table
        );
        self.with_conn(|conn| {
            conn.execute(&sql, params![record.id, record.name, record.completed])?;
            Ok(())
        })
    }

    fn delete(&self, id: &str) -> StoreResult<Option<NoteRecord>> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 RETURNING id, name, completed",
            self.table
        );
        self.with_conn(|conn| {
            let row = conn
                .query_row(&sql, params![id], read_row)
                .optional()?;
            row.transpose()
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<StoreResult<NoteRecord>> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let completed: i64 = row.get(2)?;
    let completed = match completed {
        0 => false,
        1 => true,
        other => {
            return Ok(Err(StoreError::Corrupt {
                id,
                reason: format!("completed column holds {other}"),
            }));
        }
    };
    Ok(Ok(NoteRecord { id, name, completed }))
}
