//! Persistence of the aggregate document between runs.

pub mod checkpoint;

pub use checkpoint::{CheckpointError, CheckpointStore, JsonFileStore, MemoryStore};
