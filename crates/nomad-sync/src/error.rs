//! Error types for history synchronization.
//!
//! Every variant is fatal: the two histories cannot be reconciled without an
//! operator, and the node must not finish joining.

use std::fmt::{self, Display};

use nomad_server::{NomadError, RejectionReason};
use nomad_types::{ChangeId, ChangeRequestRecord};

/// Which history an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Source,
}

impl Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("this node"),
            Self::Source => f.write_str("the source node"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("{0} has no committed or prepared change")]
    EmptyHistory(Side),

    #[error("the history of {side} does not start with a committed cluster activation: {record}")]
    NotActivated {
        side: Side,
        record: Box<ChangeRequestRecord>,
    },

    #[error(
        "no change in the source node matches the topology this node was activated with (cluster {cluster})"
    )]
    NoSyncPosition { cluster: String },

    #[error("change history does not match: {local} does not match source {peer}")]
    HistoryMismatch {
        local: Box<ChangeRequestRecord>,
        peer: Box<ChangeRequestRecord>,
    },

    #[error("change history does not match: this node is ahead of the source: {0}")]
    AheadOfSource(Box<ChangeRequestRecord>),

    #[error("change history does not match: {0} has been rolled back on the source")]
    RolledBackOnSource(Box<ChangeRequestRecord>),

    #[error("change history does not match: {0} has been rolled back on this node")]
    RolledBackLocally(Box<ChangeRequestRecord>),

    #[error("prepared change is not the last entry of {side}: {record}")]
    NotLastEntry {
        side: Side,
        record: Box<ChangeRequestRecord>,
    },

    #[error("expected a prepared change to repair, found {0}")]
    NothingToRepair(String),

    #[error("unexpected {operation} rejection of change {change_id}: {reason:?} {message:?}")]
    Rejected {
        operation: &'static str,
        change_id: ChangeId,
        reason: Option<RejectionReason>,
        message: Option<String>,
    },

    #[error("failed to encode sync payload: {0}")]
    Encode(postcard::Error),

    #[error("sync payload of {0} bytes exceeds the format limit")]
    TooLarge(usize),

    #[error("failed to decode sync payload: {0}")]
    Decode(String),

    #[error(transparent)]
    Server(#[from] NomadError),
}

/// Result type for synchronization.
pub type Result<T> = std::result::Result<T, SyncError>;
