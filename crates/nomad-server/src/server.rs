//! The protocol state machine.
//!
//! [`NomadServer`] owns one node's durable state and implements `discover`,
//! `prepare`, `commit`, `rollback` and `takeover` against it. Every accepted
//! mutative call moves the mutation count by exactly one; anything else is
//! reported as [`NomadError::MutationCountInvariant`].
//!
//! Refusals are values ([`AcceptRejectResponse`]). Errors are reserved for
//! faults the caller cannot recover from by retrying.

use std::fmt;

use nomad_storage::{RequestKind, StateChange, StateStore};
use nomad_types::{
    ChangeId, ChangeRequest, ChangeRequestRecord, ChangeRequestState, NodeContext,
    ServerMode,
};

use crate::{
    applicator::{ChangeApplicator, PotentialApplicationResult},
    error::{NomadError, Result},
    message::{
        AcceptRejectResponse, CommitMessage, DiscoverResponse, MutationStamp, NomadRequest,
        NomadResponse, PrepareMessage, RejectionReason, RollbackMessage, TakeoverMessage,
    },
};

/// One node's change-coordination endpoint.
pub struct NomadServer<S> {
    store: S,
    applicator: Option<Box<dyn ChangeApplicator>>,
}

impl<S: StateStore> NomadServer<S> {
    /// Wraps `store`, initializing it if it has never been used.
    pub fn new(store: S) -> Result<Self> {
        let mut server = Self {
            store,
            applicator: None,
        };
        if !server.store.state().is_initialized() {
            server.init()?;
        }
        Ok(server)
    }

    pub fn with_applicator(mut self, applicator: impl ChangeApplicator + 'static) -> Self {
        self.applicator = Some(Box::new(applicator));
        self
    }

    pub fn set_applicator(&mut self, applicator: Box<dyn ChangeApplicator>) {
        self.applicator = Some(applicator);
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn init(&mut self) -> Result<()> {
        self.store
            .apply(StateChange::new(RequestKind::Initialize).mode(ServerMode::Accepting))?;
        tracing::info!("initialized empty coordinator state");
        Ok(())
    }

    // ========================================================================
    // Protocol
    // ========================================================================

    /// Dispatches a request to the matching operation.
    pub fn handle(&mut self, request: NomadRequest) -> Result<NomadResponse> {
        tracing::trace!(request = request.name(), "handling request");
        match request {
            NomadRequest::Discover => Ok(NomadResponse::Discover(Box::new(self.discover()))),
            NomadRequest::Prepare(msg) => self.prepare(msg).map(NomadResponse::AcceptReject),
            NomadRequest::Commit(msg) => self.commit(msg).map(NomadResponse::AcceptReject),
            NomadRequest::Rollback(msg) => self.rollback(msg).map(NomadResponse::AcceptReject),
            NomadRequest::Takeover(msg) => self.takeover(msg).map(NomadResponse::AcceptReject),
        }
    }

    /// Returns a read-only snapshot of the coordinator state.
    pub fn discover(&self) -> DiscoverResponse {
        let state = self.store.state();
        DiscoverResponse {
            mode: state.mode(),
            mutation_count: state.mutation_count(),
            last_mutation_host: state.last_mutation_host().map(str::to_owned),
            last_mutation_user: state.last_mutation_user().map(str::to_owned),
            last_mutation_timestamp: state.last_mutation_timestamp(),
            current_version: state.current_version(),
            highest_version: state.highest_version(),
            latest_change: state.latest_change().cloned(),
            latest_committed_change: state.latest_committed_change().cloned(),
        }
    }

    pub fn prepare(&mut self, msg: PrepareMessage) -> Result<AcceptRejectResponse> {
        if self.applicator.is_none() {
            return Err(NomadError::ApplicatorNotAttached);
        }
        if let Some(rejection) = self.check_dead(&msg.stamp) {
            return Ok(rejection);
        }

        let state = self.store.state();
        if state.mode() != ServerMode::Accepting {
            return Ok(self.reject(RejectionReason::Bad, "server is not in accepting mode"));
        }
        if msg.version <= state.highest_version() {
            return Ok(self.reject(
                RejectionReason::Bad,
                format!(
                    "version {} is not greater than highest version {}",
                    msg.version,
                    state.highest_version()
                ),
            ));
        }
        if state.change(&msg.change_id).is_some() {
            return Ok(self.reject(
                RejectionReason::Bad,
                format!("change {} already exists", msg.change_id),
            ));
        }

        let existing = state.current_committed_config();
        let result = match &self.applicator {
            Some(applicator) => applicator.try_apply(existing, &msg.change),
            None => return Err(NomadError::ApplicatorNotAttached),
        };
        let prospective = match result {
            PotentialApplicationResult::Allowed(ctx) => ctx,
            PotentialApplicationResult::Rejected(reason) => {
                tracing::debug!(change_id = %msg.change_id, %reason, "prepare rejected by applicator");
                return Ok(self.reject(RejectionReason::Unacceptable, reason));
            }
        };

        let record = ChangeRequestRecord::new(
            msg.change_id,
            msg.stamp.mutation_timestamp,
            ChangeRequest::prepared(
                msg.version,
                state.latest_change_id(),
                msg.change,
                Some(prospective),
                msg.stamp.mutation_host.clone(),
                msg.stamp.mutation_user.clone(),
            ),
        );

        self.apply_state_change(
            StateChange::new(RequestKind::Prepare)
                .mode(ServerMode::Prepared)
                .latest_change_id(msg.change_id)
                .highest_version(msg.version)
                .mutated_by(
                    msg.stamp.mutation_host,
                    msg.stamp.mutation_user,
                    msg.stamp.mutation_timestamp,
                )
                .create_change(record),
        )?;

        tracing::debug!(change_id = %msg.change_id, version = %msg.version, "prepared change");
        Ok(self.accept())
    }

    pub fn commit(&mut self, msg: CommitMessage) -> Result<AcceptRejectResponse> {
        if let Some(rejection) = self.check_dead(&msg.stamp) {
            return Ok(rejection);
        }
        if let Some(rejection) = self.check_open_change(msg.change_id) {
            return Ok(rejection);
        }

        let record = self
            .store
            .state()
            .change(&msg.change_id)
            .cloned()
            .ok_or_else(|| {
                NomadError::Storage(nomad_storage::StorageError::UnknownChange(msg.change_id))
            })?;

        let applicator = self
            .applicator
            .as_mut()
            .ok_or(NomadError::ApplicatorNotAttached)?;
        applicator
            .apply(record.change(), record.result())
            .map_err(|source| {
                tracing::error!(change_id = %msg.change_id, error = %source, "failed to apply committed change");
                NomadError::Apply {
                    change_id: msg.change_id,
                    source,
                }
            })?;

        self.apply_state_change(
            StateChange::new(RequestKind::Commit)
                .mode(ServerMode::Accepting)
                .current_version(record.version())
                .mutated_by(
                    msg.stamp.mutation_host,
                    msg.stamp.mutation_user,
                    msg.stamp.mutation_timestamp,
                )
                .update_change_state(msg.change_id, ChangeRequestState::Committed),
        )?;

        tracing::debug!(change_id = %msg.change_id, version = %record.version(), "committed change");
        Ok(self.accept())
    }

    pub fn rollback(&mut self, msg: RollbackMessage) -> Result<AcceptRejectResponse> {
        if let Some(rejection) = self.check_dead(&msg.stamp) {
            return Ok(rejection);
        }
        if let Some(rejection) = self.check_open_change(msg.change_id) {
            return Ok(rejection);
        }

        self.apply_state_change(
            StateChange::new(RequestKind::Rollback)
                .mode(ServerMode::Accepting)
                .mutated_by(
                    msg.stamp.mutation_host,
                    msg.stamp.mutation_user,
                    msg.stamp.mutation_timestamp,
                )
                .update_change_state(msg.change_id, ChangeRequestState::RolledBack),
        )?;

        tracing::debug!(change_id = %msg.change_id, "rolled back change");
        Ok(self.accept())
    }

    pub fn takeover(&mut self, msg: TakeoverMessage) -> Result<AcceptRejectResponse> {
        if let Some(rejection) = self.check_dead(&msg.stamp) {
            return Ok(rejection);
        }

        let host = msg.stamp.mutation_host.clone();
        self.apply_state_change(StateChange::new(RequestKind::Takeover).mutated_by(
            msg.stamp.mutation_host,
            msg.stamp.mutation_user,
            msg.stamp.mutation_timestamp,
        ))?;

        tracing::info!(%host, "coordinator takeover");
        Ok(self.accept())
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Writes peer records into the history verbatim, without consulting
    /// the applicator.
    ///
    /// `project` computes each record's stored configuration from the
    /// configuration committed so far and the peer record. Every imported
    /// record counts as one mutation.
    pub fn force_sync<F>(&mut self, records: &[ChangeRequestRecord], mut project: F) -> Result<()>
    where
        F: FnMut(Option<&NodeContext>, &ChangeRequestRecord) -> NodeContext,
    {
        for peer in records {
            let state = self.store.state();
            if state.change(&peer.id).is_some() {
                tracing::error!(change_id = %peer.id, "force-sync would duplicate an existing change");
                return Err(NomadError::DuplicateChange(peer.id));
            }

            let result = project(state.current_committed_config(), peer);
            let mut request = ChangeRequest::prepared(
                peer.version(),
                state.latest_change_id(),
                peer.change().clone(),
                Some(result),
                peer.creation_host(),
                peer.creation_user(),
            );
            request.state = peer.state();

            let mode = if peer.state() == ChangeRequestState::Prepared {
                ServerMode::Prepared
            } else {
                ServerMode::Accepting
            };
            let mut change = StateChange::new(RequestKind::ForceSync)
                .mode(mode)
                .latest_change_id(peer.id)
                .highest_version(peer.version().max(state.highest_version()))
                .mutated_by(
                    peer.creation_host(),
                    peer.creation_user(),
                    peer.creation_timestamp,
                );
            if peer.state() == ChangeRequestState::Committed {
                change = change.current_version(peer.version());
            }
            change = change.create_change(ChangeRequestRecord::new(
                peer.id,
                peer.creation_timestamp,
                request,
            ));

            self.apply_state_change(change)?;
            tracing::debug!(change_id = %peer.id, version = %peer.version(), state = %peer.state(), "force-synced change");
        }
        Ok(())
    }

    /// Wipes the durable state and re-initializes it empty.
    pub fn reset(&mut self) -> Result<()> {
        tracing::warn!("resetting coordinator state");
        self.store.reset()?;
        self.init()
    }

    /// Returns true if the latest change is still waiting for commit or
    /// rollback.
    pub fn has_incomplete_change(&self) -> bool {
        let state = self.store.state();
        state.mode() == ServerMode::Prepared
            || state
                .latest_change()
                .is_some_and(|r| r.state() == ChangeRequestState::Prepared)
    }

    pub fn change(&self, id: &ChangeId) -> Option<&ChangeRequestRecord> {
        self.store.state().change(id)
    }

    pub fn current_committed_config(&self) -> Option<&NodeContext> {
        self.store.state().current_committed_config()
    }

    /// Exports the full history, oldest first.
    pub fn change_history(&self) -> Vec<ChangeRequestRecord> {
        self.store.state().history().to_vec()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn apply_state_change(&mut self, change: StateChange) -> Result<()> {
        let expected = self.store.state().mutation_count().next();
        self.store.apply(change)?;
        let found = self.store.state().mutation_count();
        if found != expected {
            tracing::error!(%expected, %found, "mutation count did not advance by exactly one");
            return Err(NomadError::MutationCountInvariant { expected, found });
        }
        Ok(())
    }

    fn check_dead(&self, stamp: &MutationStamp) -> Option<AcceptRejectResponse> {
        let current = self.store.state().mutation_count();
        (stamp.expected_mutation_count != current).then(|| {
            self.reject(
                RejectionReason::Dead,
                format!(
                    "expected mutation count {} but was {current}",
                    stamp.expected_mutation_count
                ),
            )
        })
    }

    /// Shared commit/rollback preconditions: a change is open and it is the
    /// one named.
    fn check_open_change(&self, change_id: ChangeId) -> Option<AcceptRejectResponse> {
        let state = self.store.state();
        if state.mode() != ServerMode::Prepared {
            return Some(self.reject(RejectionReason::Bad, "server is not in prepared mode"));
        }
        match state.change(&change_id) {
            None => Some(self.reject(
                RejectionReason::Bad,
                format!("no change exists with id {change_id}"),
            )),
            Some(record) if record.state() != ChangeRequestState::Prepared => Some(self.reject(
                RejectionReason::Bad,
                format!("change {change_id} is already {}", record.state()),
            )),
            Some(_) => None,
        }
    }

    fn accept(&self) -> AcceptRejectResponse {
        let state = self.store.state();
        AcceptRejectResponse::accept(
            state.last_mutation_host().map(str::to_owned),
            state.last_mutation_user().map(str::to_owned),
        )
    }

    fn reject(&self, reason: RejectionReason, message: impl Into<String>) -> AcceptRejectResponse {
        let state = self.store.state();
        AcceptRejectResponse::reject(
            reason,
            message,
            state.last_mutation_host().map(str::to_owned),
            state.last_mutation_user().map(str::to_owned),
        )
    }
}

impl<S> fmt::Debug for NomadServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NomadServer")
            .field("applicator_attached", &self.applicator.is_some())
            .finish_non_exhaustive()
    }
}
