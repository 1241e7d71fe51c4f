//! In-memory store for development/testing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::{QueueError, TaskRecord};

use super::TaskStore;

/// Keeps the latest snapshot in memory.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Vec<TaskRecord>>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    #[must_use]
    pub fn with_records(records: Vec<TaskRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Records from the latest successful write.
    #[must_use]
    pub fn snapshot(&self) -> Vec<TaskRecord> {
        self.records.lock().clone()
    }

    /// Number of successful writes.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make subsequent writes fail (fault injection for tests).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }
}

impl TaskStore for InMemoryStore {
    fn load(&self) -> Result<Vec<TaskRecord>, QueueError> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &[TaskRecord]) -> Result<(), QueueError> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(QueueError::Persistence("in-memory store rejected write".into()));
        }
        *self.records.lock() = records.to_vec();
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
