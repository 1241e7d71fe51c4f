//! Persistent store backends.
//!
//! A store holds a snapshot of every task record keyed by id. The queue is the
//! only writer; it always hands over the complete current snapshot, so a backend
//! never needs to merge partial updates.

pub mod json_file;
pub mod memory;

pub use json_file::JsonFileStore;
pub use memory::InMemoryStore;

use crate::core::{QueueError, TaskRecord};

/// Abstraction for snapshot store backends.
///
/// Calls are synchronous; the queue runs them on tokio's blocking pool.
pub trait TaskStore: Send + Sync + 'static {
    /// Load every persisted record.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` when the snapshot exists but cannot be read.
    fn load(&self) -> Result<Vec<TaskRecord>, QueueError>;

    /// Replace the persisted snapshot with `records`.
    ///
    /// # Errors
    ///
    /// `QueueError::Persistence` when the write did not complete; the previous
    /// snapshot must still be readable in that case.
    fn save(&self, records: &[TaskRecord]) -> Result<(), QueueError>;

    /// Short backend label for logs.
    fn describe(&self) -> String;
}
