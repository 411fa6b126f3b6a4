//! Error types for durable state storage.

use std::io;

use nomad_types::{ChangeId, ChangeRequestState};

/// Errors that can occur while reading or writing coordinator state.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode state change: {0}")]
    Encode(postcard::Error),

    #[error("failed to decode state change at byte {position}: {source}")]
    Decode {
        position: u64,
        source: postcard::Error,
    },

    #[error("corrupted record at byte {position}")]
    CorruptedRecord { position: u64 },

    #[error("torn write at byte {position}: {reason}")]
    TornWrite { position: u64, reason: String },

    #[error("state is not initialized")]
    NotInitialized,

    #[error("state is already initialized")]
    AlreadyInitialized,

    #[error("change {0} already exists in the history")]
    DuplicateChange(ChangeId),

    #[error("change {0} does not exist in the history")]
    UnknownChange(ChangeId),

    #[error("change {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: ChangeId,
        from: ChangeRequestState,
        to: ChangeRequestState,
    },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
