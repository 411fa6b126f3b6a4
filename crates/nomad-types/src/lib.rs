//! # nomad-types: Core types for `Nomad`
//!
//! This crate contains the shared vocabulary of the change-coordination
//! protocol:
//! - Identifiers ([`ChangeId`], [`Version`], [`MutationCount`])
//! - Protocol states ([`ChangeRequestState`], [`ServerMode`])
//! - The cluster model ([`Cluster`], [`Stripe`], [`Node`], [`NodeContext`])
//! - Configuration changes ([`Change`], [`SettingChange`], [`Applicability`])
//! - History entries ([`ChangeRequest`], [`ChangeRequestRecord`])

use std::{
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod change;
pub mod request;
pub mod topology;

pub use change::{Applicability, Change, ChangeError, SettingChange, SettingOp};
pub use request::{ChangeRequest, ChangeRequestRecord, ResultHash};
pub use topology::{Cluster, Node, NodeContext, Stripe};

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier of a change request.
///
/// Generated by the coordinator that first prepares the change and carried
/// verbatim by every node that later replays or force-syncs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(Uuid);

impl ChangeId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ChangeId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for ChangeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// 1-based sequence number a change occupies once prepared.
///
/// Version 0 means "nothing committed yet". Versions accepted by a node are
/// strictly increasing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Version(u64);

impl Version {
    pub const ZERO: Version = Version(0);

    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the version immediately after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Count of successful state mutations on a node.
///
/// Used as an optimistic-concurrency fence: every mutative message carries
/// the count the sender expects, and a mismatch means the sender's view of
/// the node is stale. It is not a version number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct MutationCount(u64);

impl MutationCount {
    pub const ZERO: MutationCount = MutationCount(0);

    pub fn new(count: u64) -> Self {
        Self(count)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for MutationCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MutationCount {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ============================================================================
// Protocol States
// ============================================================================

/// Lifecycle state of a single change request.
///
/// `Prepared` is the only transient state. A change moves to exactly one of
/// the terminal states and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestState {
    Prepared,
    Committed,
    RolledBack,
}

impl ChangeRequestState {
    /// Returns true for `Committed` and `RolledBack`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Prepared)
    }

    /// Returns true if a change may move from `self` to `next`.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Prepared, Self::Committed | Self::RolledBack)
        )
    }
}

impl Display for ChangeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Prepared => "PREPARED",
            Self::Committed => "COMMITTED",
            Self::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

/// Node-local protocol mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMode {
    /// Ready for a new change.
    #[default]
    Accepting,
    /// One change is open, awaiting commit or rollback.
    Prepared,
}

impl Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepting => f.write_str("ACCEPTING"),
            Self::Prepared => f.write_str("PREPARED"),
        }
    }
}
