//! Progress events emitted during an import run.
//!
//! The core crate only defines the sink; renderers (human-readable stderr,
//! JSON lines) live in the app crate.

use crate::models::Key;

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportEvent {
    /// Inference appended these field keys to the schema.
    SchemaInferred { fields: Vec<Key> },
    /// A chunk was committed. `total` is the running item count.
    ChunkCommitted { chunk: u64, items: usize, total: u64 },
    /// The run finished without error.
    Finished {
        total: u64,
        inserted: u64,
        updated: u64,
        ignored: u64,
    },
}

/// Receives progress events. Implementations must not block for long; they
/// are called inline between chunks.
pub trait ImportProgress: Send + Sync {
    fn report(&self, event: &ImportEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ImportProgress for NoProgress {
    fn report(&self, _event: &ImportEvent) {}
}
