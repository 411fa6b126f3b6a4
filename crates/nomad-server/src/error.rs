//! Error types for the protocol state machine.
//!
//! These are fatal local faults. Expected protocol refusals are returned as
//! [`AcceptRejectResponse`](crate::AcceptRejectResponse) values instead.

use nomad_storage::StorageError;
use nomad_types::{ChangeId, MutationCount};

use crate::applicator::ApplyError;

#[derive(thiserror::Error, Debug)]
pub enum NomadError {
    #[error("no change applicator is attached to this server")]
    ApplicatorNotAttached,

    #[error("mutation count invariant violated: expected {expected}, found {found}")]
    MutationCountInvariant {
        expected: MutationCount,
        found: MutationCount,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to apply committed change {change_id}: {source}")]
    Apply {
        change_id: ChangeId,
        source: ApplyError,
    },

    #[error("change {0} already exists in the history")]
    DuplicateChange(ChangeId),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, NomadError>;
