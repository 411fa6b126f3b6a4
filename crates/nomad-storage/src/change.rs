//! Atomic state updates.
//!
//! A [`StateChange`] names every field a protocol step touches. Stores apply
//! it as one unit: either every field moves or none does.

use chrono::{DateTime, Utc};
use nomad_types::{ChangeId, ChangeRequestRecord, ChangeRequestState, ServerMode, Version};
use serde::{Deserialize, Serialize};

/// The protocol step that produced a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    /// Creates the empty state. Does not count as a mutation.
    Initialize,
    Prepare,
    Commit,
    Rollback,
    Takeover,
    /// Verbatim import of a peer record.
    ForceSync,
}

impl RequestKind {
    /// Returns true if applying a change of this kind bumps the mutation count.
    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Initialize)
    }
}

/// A named set of field updates plus an optional history write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub(crate) kind: RequestKind,
    pub(crate) mode: Option<ServerMode>,
    pub(crate) latest_change_id: Option<ChangeId>,
    pub(crate) current_version: Option<Version>,
    pub(crate) highest_version: Option<Version>,
    pub(crate) last_mutation_host: Option<String>,
    pub(crate) last_mutation_user: Option<String>,
    pub(crate) last_mutation_timestamp: Option<DateTime<Utc>>,
    pub(crate) new_record: Option<ChangeRequestRecord>,
    pub(crate) state_update: Option<(ChangeId, ChangeRequestState)>,
}

impl StateChange {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            mode: None,
            latest_change_id: None,
            current_version: None,
            highest_version: None,
            last_mutation_host: None,
            last_mutation_user: None,
            last_mutation_timestamp: None,
            new_record: None,
            state_update: None,
        }
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn mode(mut self, mode: ServerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn latest_change_id(mut self, id: ChangeId) -> Self {
        self.latest_change_id = Some(id);
        self
    }

    pub fn current_version(mut self, version: Version) -> Self {
        self.current_version = Some(version);
        self
    }

    pub fn highest_version(mut self, version: Version) -> Self {
        self.highest_version = Some(version);
        self
    }

    /// Stamps who performed the mutation and when.
    pub fn mutated_by(
        mut self,
        host: impl Into<String>,
        user: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        self.last_mutation_host = Some(host.into());
        self.last_mutation_user = Some(user.into());
        self.last_mutation_timestamp = Some(timestamp);
        self
    }

    /// Appends `record` to the history.
    pub fn create_change(mut self, record: ChangeRequestRecord) -> Self {
        self.new_record = Some(record);
        self
    }

    /// Moves an existing record to `state`.
    pub fn update_change_state(mut self, id: ChangeId, state: ChangeRequestState) -> Self {
        self.state_update = Some((id, state));
        self
    }
}
