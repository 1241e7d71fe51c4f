//! Infrastructure adapters for persisting task records.

pub mod store;

pub use store::{InMemoryStore, JsonFileStore, TaskStore};
