//! Integrity errors raised by the chunk index.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// A citation (or caller) referenced an id the index does not hold.
    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    /// Two chunks share an id; the corpus produced a non-unique identity.
    #[error("duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    /// Chunk sequence, vector matrix, and id map disagree.
    #[error("index misaligned: {0}")]
    Misaligned(String),

    #[error("vector for {chunk_id} has {actual} dims, expected {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
}
