//! The durable coordinator state and its transition function.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use nomad_types::{
    ChangeId, ChangeRequestRecord, ChangeRequestState, MutationCount, NodeContext, ServerMode,
    Version,
};

use crate::{
    change::{RequestKind, StateChange},
    error::{Result, StorageError},
};

/// Everything the protocol persists about one node.
///
/// Only [`CoordinatorState::apply`] mutates it, so every store (memory or
/// file) shares a single transition function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorState {
    initialized: bool,
    mode: ServerMode,
    mutation_count: MutationCount,
    last_mutation_host: Option<String>,
    last_mutation_user: Option<String>,
    last_mutation_timestamp: Option<DateTime<Utc>>,
    current_version: Version,
    highest_version: Version,
    latest_change_id: Option<ChangeId>,
    history: Vec<ChangeRequestRecord>,
    index: HashMap<ChangeId, usize>,
}

impl CoordinatorState {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn mutation_count(&self) -> MutationCount {
        self.mutation_count
    }

    pub fn last_mutation_host(&self) -> Option<&str> {
        self.last_mutation_host.as_deref()
    }

    pub fn last_mutation_user(&self) -> Option<&str> {
        self.last_mutation_user.as_deref()
    }

    pub fn last_mutation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_mutation_timestamp
    }

    pub fn current_version(&self) -> Version {
        self.current_version
    }

    pub fn highest_version(&self) -> Version {
        self.highest_version
    }

    pub fn latest_change_id(&self) -> Option<ChangeId> {
        self.latest_change_id
    }

    /// Returns the history in the order records were written.
    pub fn history(&self) -> &[ChangeRequestRecord] {
        &self.history
    }

    pub fn change(&self, id: &ChangeId) -> Option<&ChangeRequestRecord> {
        self.index.get(id).map(|&pos| &self.history[pos])
    }

    pub fn latest_change(&self) -> Option<&ChangeRequestRecord> {
        self.latest_change_id.as_ref().and_then(|id| self.change(id))
    }

    /// Walks the `prev_change_id` chain back from the latest change to the
    /// first committed one.
    pub fn latest_committed_change(&self) -> Option<&ChangeRequestRecord> {
        let mut cursor = self.latest_change();
        while let Some(record) = cursor {
            if record.state() == ChangeRequestState::Committed {
                return Some(record);
            }
            cursor = record
                .request
                .prev_change_id
                .as_ref()
                .and_then(|id| self.change(id));
        }
        None
    }

    /// Configuration produced by the most recent committed change.
    pub fn current_committed_config(&self) -> Option<&NodeContext> {
        self.history
            .iter()
            .rev()
            .find(|r| r.state() == ChangeRequestState::Committed)
            .and_then(ChangeRequestRecord::result)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Applies `change` atomically.
    ///
    /// Every precondition is checked before any field is written, so an
    /// error leaves the state untouched.
    pub fn apply(&mut self, change: &StateChange) -> Result<()> {
        self.check(change)?;

        if change.kind == RequestKind::Initialize {
            *self = Self {
                initialized: true,
                ..Self::default()
            };
        }

        if let Some(mode) = change.mode {
            self.mode = mode;
        }
        if let Some(id) = change.latest_change_id {
            self.latest_change_id = Some(id);
        }
        if let Some(version) = change.current_version {
            self.current_version = version;
        }
        if let Some(version) = change.highest_version {
            self.highest_version = version;
        }
        if let Some(host) = &change.last_mutation_host {
            self.last_mutation_host = Some(host.clone());
        }
        if let Some(user) = &change.last_mutation_user {
            self.last_mutation_user = Some(user.clone());
        }
        if let Some(timestamp) = change.last_mutation_timestamp {
            self.last_mutation_timestamp = Some(timestamp);
        }
        if let Some(record) = &change.new_record {
            self.index.insert(record.id, self.history.len());
            self.history.push(record.clone());
        }
        if let Some((id, state)) = change.state_update {
            let pos = self.index[&id];
            self.history[pos].request.state = state;
        }
        if change.kind.is_mutation() {
            self.mutation_count = self.mutation_count.next();
        }

        debug_assert!(
            self.highest_version >= self.current_version,
            "highest version fell below current version"
        );
        debug_assert_eq!(self.history.len(), self.index.len());
        Ok(())
    }

    /// Validates `change` against the current state without applying it.
    pub(crate) fn check(&self, change: &StateChange) -> Result<()> {
        match (change.kind, self.initialized) {
            (RequestKind::Initialize, true) => return Err(StorageError::AlreadyInitialized),
            (RequestKind::Initialize, false) => return Ok(()),
            (_, false) => return Err(StorageError::NotInitialized),
            _ => {}
        }

        if let Some(record) = &change.new_record {
            if self.index.contains_key(&record.id) {
                return Err(StorageError::DuplicateChange(record.id));
            }
        }

        if let Some((id, to)) = change.state_update {
            let from = match &change.new_record {
                Some(record) if record.id == id => record.state(),
                _ => self
                    .change(&id)
                    .map(ChangeRequestRecord::state)
                    .ok_or(StorageError::UnknownChange(id))?,
            };
            if !from.can_transition_to(to) {
                return Err(StorageError::InvalidTransition { id, from, to });
            }
        }
        Ok(())
    }
}
