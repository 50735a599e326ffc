use std::sync::{
    RwLock,
    atomic::{AtomicUsize, Ordering},
};

use hashbrown::HashMap;
use tokio::time::Duration;

use crate::{
    note::NoteRecord,
    types::{DEFAULT_TABLE_NAME, NoteId},
};

use super::{NoteStore, StoreError, StoreResult};

/// In-memory [`NoteStore`] with optional fault injection for tests.
#[derive(Debug)]
pub struct MemoryNoteStore {
    table: String,
    records: RwLock<HashMap<NoteId, NoteRecord>>,
    failing_puts: AtomicUsize,
    put_latency: Option<Duration>,
}

impl Default for MemoryNoteStore {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_NAME)
    }
}

impl MemoryNoteStore {
    /// Creates an empty table named `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            records: RwLock::new(HashMap::new()),
            failing_puts: AtomicUsize::new(0),
            put_latency: None,
        }
    }

    /// Makes every `put` block for `latency` before writing.
    pub fn with_put_latency(mut self, latency: Duration) -> Self {
        self.put_latency = Some(latency);
        self
    }

    /// Makes the next `n` calls to `put` fail with [`StoreError::Unavailable`].
    pub fn fail_next_puts(&self, n: usize) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// True when the table holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("table lock poisoned".to_string())
}

impl NoteStore for MemoryNoteStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn get(&self, id: &str) -> StoreResult<Option<NoteRecord>> {
        Ok(self.records.read().map_err(poisoned)?.get(id).cloned())
    }

    fn list(&self) -> StoreResult<Vec<NoteRecord>> {
        Ok(self.records.read().map_err(poisoned)?.values().cloned().collect())
    }

    fn put(&self, record: &NoteRecord) -> StoreResult<()> {
        if let Some(latency) = self.put_latency {
            std::thread::sleep(latency);
        }
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable(format!(
                "injected put failure for {:?}",
                record.id
            )));
        }
        self.records
            .write()
            .map_err(poisoned)?
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> StoreResult<Option<NoteRecord>> {
        Ok(self.records.write().map_err(poisoned)?.remove(id))
    }
}
