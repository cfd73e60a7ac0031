//! Error types for the log index.

use thiserror::Error;

pub type IndexResult<T> = Result<T, IndexError>;

/// Index invariant violations. A metalog gap or duplicate is fatal for
/// the affected view; the caller decides view-level recovery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("metalog gap: expected seqnum {expected}, got {got}")]
    MetalogGap { expected: u32, got: u32 },

    #[error("log space sealed at position {sealed_position}, rejecting seqnum {got}")]
    Sealed { sealed_position: u32, got: u32 },

    #[error("storage shard {shard} out of range for {num_shards} shards")]
    ShardOutOfRange { shard: u16, num_shards: usize },

    #[error(
        "end_seqnum mismatch at metalog position {position}: cached {cached}, shard sent {got}"
    )]
    EndSeqnumMismatch { position: u32, cached: u32, got: u32 },
}
