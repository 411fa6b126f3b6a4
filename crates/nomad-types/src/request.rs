//! History entries: a change plus everything the protocol records about it.

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ChangeId, ChangeRequestState, Version,
    change::Change,
    topology::NodeContext,
};

/// Content hash of the configuration a change produced.
///
/// Two nodes that applied different change ids but ended up with the same
/// configuration produce the same hash, which lets history comparison treat
/// them as equivalent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ResultHash(String);

impl ResultHash {
    /// Hashes the canonical encoding of the cluster in `result`.
    ///
    /// The node name is left out so that every member of a cluster agrees.
    /// An absent result hashes to the empty value, which never matches.
    ///
    /// # Panics
    ///
    /// Panics if postcard cannot encode the cluster. Encoding into a `Vec`
    /// has no I/O and every cluster field is a string, map or integer, so
    /// this should never happen.
    pub fn of(result: Option<&NodeContext>) -> Self {
        match result {
            None => Self::default(),
            Some(ctx) => {
                let bytes = postcard::to_allocvec(ctx.cluster())
                    .expect("Cluster serialization should never fail");
                Self(blake3::hash(&bytes).to_hex().to_string())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResultHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a node stores about a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub state: ChangeRequestState,
    pub version: Version,
    /// Id of the change that was latest when this one was prepared.
    pub prev_change_id: Option<ChangeId>,
    pub change: Change,
    /// Configuration after applying the change; absent if never computed.
    pub result: Option<NodeContext>,
    pub result_hash: ResultHash,
    pub creation_host: String,
    pub creation_user: String,
}

impl ChangeRequest {
    /// Builds a freshly prepared request, hashing `result`.
    pub fn prepared(
        version: Version,
        prev_change_id: Option<ChangeId>,
        change: Change,
        result: Option<NodeContext>,
        creation_host: impl Into<String>,
        creation_user: impl Into<String>,
    ) -> Self {
        let result_hash = ResultHash::of(result.as_ref());
        Self {
            state: ChangeRequestState::Prepared,
            version,
            prev_change_id,
            change,
            result,
            result_hash,
            creation_host: creation_host.into(),
            creation_user: creation_user.into(),
        }
    }
}

/// A [`ChangeRequest`] together with its identity and creation time.
///
/// This is the unit of history exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestRecord {
    pub id: ChangeId,
    pub creation_timestamp: DateTime<Utc>,
    pub request: ChangeRequest,
}

impl ChangeRequestRecord {
    pub fn new(id: ChangeId, creation_timestamp: DateTime<Utc>, request: ChangeRequest) -> Self {
        Self {
            id,
            creation_timestamp,
            request,
        }
    }

    pub fn state(&self) -> ChangeRequestState {
        self.request.state
    }

    pub fn version(&self) -> Version {
        self.request.version
    }

    pub fn change(&self) -> &Change {
        &self.request.change
    }

    pub fn result(&self) -> Option<&NodeContext> {
        self.request.result.as_ref()
    }

    pub fn result_hash(&self) -> &ResultHash {
        &self.request.result_hash
    }

    pub fn creation_host(&self) -> &str {
        &self.request.creation_host
    }

    pub fn creation_user(&self) -> &str {
        &self.request.creation_user
    }

    /// Returns a copy of this record in `state`.
    pub fn with_state(&self, state: ChangeRequestState) -> Self {
        let mut copy = self.clone();
        copy.request.state = state;
        copy
    }

    /// Returns true if `other` describes the same logical change.
    ///
    /// Version and change payload must agree. Beyond that, the records match
    /// if they share an id or if both produced the same non-empty result.
    pub fn matches(&self, other: &ChangeRequestRecord) -> bool {
        if self.version() != other.version() || self.change() != other.change() {
            return false;
        }
        self.id == other.id
            || (!self.result_hash().is_empty() && self.result_hash() == other.result_hash())
    }
}

impl Display for ChangeRequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] {} (by {}@{} at {})",
            self.version(),
            self.id,
            self.state(),
            self.change().summary(),
            self.creation_user(),
            self.creation_host(),
            self.creation_timestamp.to_rfc3339()
        )
    }
}
