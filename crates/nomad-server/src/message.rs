//! Protocol messages.
//!
//! Every mutative message carries the mutation count the sender last saw on
//! the target node plus the identity stamped on the resulting mutation. The
//! closed [`NomadRequest`] / [`NomadResponse`] pair lets transports dispatch
//! with a single `match`.

use chrono::{DateTime, Utc};
use nomad_types::{
    Change, ChangeId, ChangeRequestRecord, MutationCount, ServerMode, Version,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

/// Who is mutating a node, and what they believe its mutation count is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationStamp {
    pub expected_mutation_count: MutationCount,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp: DateTime<Utc>,
}

impl MutationStamp {
    pub fn new(
        expected_mutation_count: MutationCount,
        mutation_host: impl Into<String>,
        mutation_user: impl Into<String>,
    ) -> Self {
        Self {
            expected_mutation_count,
            mutation_host: mutation_host.into(),
            mutation_user: mutation_user.into(),
            mutation_timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMessage {
    pub stamp: MutationStamp,
    pub change_id: ChangeId,
    pub version: Version,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub stamp: MutationStamp,
    pub change_id: ChangeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMessage {
    pub stamp: MutationStamp,
    pub change_id: ChangeId,
}

/// Asserts coordinator ownership without touching any change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverMessage {
    pub stamp: MutationStamp,
}

/// The closed set of requests a node accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NomadRequest {
    Discover,
    Prepare(PrepareMessage),
    Commit(CommitMessage),
    Rollback(RollbackMessage),
    Takeover(TakeoverMessage),
}

impl NomadRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Prepare(_) => "prepare",
            Self::Commit(_) => "commit",
            Self::Rollback(_) => "rollback",
            Self::Takeover(_) => "takeover",
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

/// Why a node refused a mutative message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// The sender's mutation count is stale.
    Dead,
    /// A mode, version or duplicate precondition failed.
    Bad,
    /// The applicator refused the change.
    Unacceptable,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dead => "DEAD",
            Self::Bad => "BAD",
            Self::Unacceptable => "UNACCEPTABLE",
        })
    }
}

/// Outcome of a mutative message.
///
/// Always carries the node's last mutation host and user as they stand
/// after the call, so a rejected caller learns who got there first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRejectResponse {
    pub accepted: bool,
    pub rejection_reason: Option<RejectionReason>,
    pub rejection_message: Option<String>,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
}

impl AcceptRejectResponse {
    pub fn accept(last_mutation_host: Option<String>, last_mutation_user: Option<String>) -> Self {
        Self {
            accepted: true,
            rejection_reason: None,
            rejection_message: None,
            last_mutation_host,
            last_mutation_user,
        }
    }

    pub fn reject(
        reason: RejectionReason,
        message: impl Into<String>,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    ) -> Self {
        Self {
            accepted: false,
            rejection_reason: Some(reason),
            rejection_message: Some(message.into()),
            last_mutation_host,
            last_mutation_user,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn is_rejected_with(&self, reason: RejectionReason) -> bool {
        self.rejection_reason == Some(reason)
    }
}

/// Read-only snapshot returned by `discover`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub mode: ServerMode,
    pub mutation_count: MutationCount,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp: Option<DateTime<Utc>>,
    pub current_version: Version,
    pub highest_version: Version,
    pub latest_change: Option<ChangeRequestRecord>,
    /// Most recent committed change, following `prev_change_id` links back
    /// from `latest_change`.
    pub latest_committed_change: Option<ChangeRequestRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NomadResponse {
    Discover(Box<DiscoverResponse>),
    AcceptReject(AcceptRejectResponse),
}

impl NomadResponse {
    pub fn into_discover(self) -> Option<DiscoverResponse> {
        match self {
            Self::Discover(d) => Some(*d),
            Self::AcceptReject(_) => None,
        }
    }

    pub fn into_accept_reject(self) -> Option<AcceptRejectResponse> {
        match self {
            Self::AcceptReject(r) => Some(r),
            Self::Discover(_) => None,
        }
    }
}
