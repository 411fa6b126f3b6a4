//! Change-history reconciliation.
//!
//! A node joining or restarting compares its own history with a source
//! node's and drives its local [`NomadServer`] until both agree.
//!
//! # Algorithm
//!
//! Both histories are first filtered to committed and prepared entries. Then:
//!
//! 1. **New node joining an activated cluster.** The local history holds only
//!    its own activation and that activation is not the source's. The local
//!    state is reset and every source entry up to the last topology change
//!    matching this node's activation topology is force-synced.
//! 2. **Otherwise**, entries rolled back on either side are resolved and
//!    dropped, and the remaining entries are compared pairwise:
//!
//! | this node | source    | outcome                                  |
//! |-----------|-----------|------------------------------------------|
//! | COMMITTED | COMMITTED | match                                    |
//! | PREPARED  | PREPARED  | warn, operator must repair               |
//! | PREPARED  | COMMITTED | commit locally, restart required         |
//! | COMMITTED | PREPARED  | warn, operator must repair on the source |
//! | PREPARED  | missing   | roll back locally                        |
//! | COMMITTED | missing   | fatal: this node is ahead                |
//!
//! Finally every source entry left over is replayed through the normal
//! prepare/commit path.

use std::collections::{BTreeSet, HashSet, VecDeque};

use nomad_server::{
    AcceptRejectResponse, CommitMessage, MutationStamp, NomadServer, PrepareMessage,
    RollbackMessage, SerializingNomadServer,
};
use nomad_storage::StateStore;
use nomad_types::{
    ChangeId, ChangeRequestRecord, ChangeRequestState, Cluster, MutationCount, NodeContext,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, Side, SyncError},
    payload::SyncPayload,
};

/// What the caller must do once a sync completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Require {
    Nothing,
    /// Newly committed changes only take effect after a restart.
    RestartRequired,
    /// The node's data must be wiped before it can serve.
    ZapRequired,
}

impl std::fmt::Display for Require {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Nothing => "NOTHING",
            Self::RestartRequired => "RESTART_REQUIRED",
            Self::ZapRequired => "ZAP_REQUIRED",
        })
    }
}

/// Tuning for [`HistorySynchronizer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Report [`Require::ZapRequired`] when a join resets the local history.
    pub zap_on_reset: bool,
}

/// Reconciles a node's history against a source node's.
#[derive(Debug, Clone)]
pub struct HistorySynchronizer {
    startup: NodeContext,
    options: SyncOptions,
}

impl HistorySynchronizer {
    /// `startup` is the configuration this node booted with; force-synced
    /// entries are projected onto it.
    pub fn new(startup: NodeContext, options: SyncOptions) -> Self {
        Self { startup, options }
    }

    /// Runs a sync while holding the node's lock for the whole duration.
    pub fn sync_serialized<S: StateStore>(
        &self,
        server: &SerializingNomadServer<S>,
        payload: &SyncPayload,
    ) -> Result<BTreeSet<Require>> {
        server.with_exclusive(|server| self.sync(server, payload))
    }

    /// Brings `server`'s history in line with `payload` and reports what
    /// the caller must do next. Never returns an empty set.
    pub fn sync<S: StateStore>(
        &self,
        server: &mut NomadServer<S>,
        payload: &SyncPayload,
    ) -> Result<BTreeSet<Require>> {
        let result = self.run(server, payload);
        match &result {
            Ok(requires) => tracing::info!(?requires, "history sync complete"),
            Err(e) => tracing::error!(error = %e, "history sync failed"),
        }
        result
    }

    fn run<S: StateStore>(
        &self,
        server: &mut NomadServer<S>,
        payload: &SyncPayload,
    ) -> Result<BTreeSet<Require>> {
        let local_all = server.change_history();
        let source_all = &payload.history;
        let mut local = relevant(&local_all);
        let mut source = relevant(source_all);

        tracing::info!(
            source = source.len(),
            local = local.len(),
            "syncing committed changes from source"
        );

        let first_local = local
            .front()
            .cloned()
            .ok_or(SyncError::EmptyHistory(Side::Local))?;
        let first_source = source
            .front()
            .cloned()
            .ok_or(SyncError::EmptyHistory(Side::Source))?;
        let activation = check_activation(&first_local, Side::Local)?;
        check_activation(&first_source, Side::Source)?;

        let mut requires = BTreeSet::new();

        let new_node = local.len() == 1;
        let joint_activation = first_local.matches(&first_source);
        if new_node && !joint_activation {
            self.join(server, activation, &payload.source_topology, &mut source, &mut requires)?;
        } else {
            reconcile(server, &local_all, source_all, &mut local, &mut source, &mut requires)?;
        }

        normal_sync(server, &source, &mut requires)?;

        if requires.is_empty() {
            requires.insert(Require::Nothing);
        }
        Ok(requires)
    }

    fn join<S: StateStore>(
        &self,
        server: &mut NomadServer<S>,
        activation: &Cluster,
        source_topology: &Cluster,
        source: &mut VecDeque<ChangeRequestRecord>,
        requires: &mut BTreeSet<Require>,
    ) -> Result<()> {
        tracing::info!(cluster = %activation.name, "new node is joining an activated cluster");

        let pos = find_last_sync_position(source, source_topology, activation).ok_or_else(|| {
            SyncError::NoSyncPosition {
                cluster: activation.name.clone(),
            }
        })?;

        server.reset()?;

        let forced: Vec<_> = source.drain(..=pos).collect();
        tracing::info!(count = forced.len(), "force-syncing historical changes");
        server.force_sync(&forced, |previous, record| self.project(previous, record))?;

        if self.options.zap_on_reset {
            requires.insert(Require::ZapRequired);
        }
        Ok(())
    }

    /// Configuration stored for a force-synced change.
    ///
    /// Topology changes take the cluster the source recorded for them.
    /// Other changes are replayed onto the previous configuration; those that
    /// no longer apply (they concern nodes this one never knew) leave it in
    /// place. A cluster that does not contain this node is replaced by the
    /// node alone.
    fn project(&self, previous: Option<&NodeContext>, record: &ChangeRequestRecord) -> NodeContext {
        let previous = previous.map(NodeContext::cluster);
        let change = record.change();
        let update = match record.result() {
            Some(result) if change.is_topology() => Some(result.cluster().clone()),
            _ => match change.apply_to(previous) {
                Ok(cluster) => Some(cluster),
                Err(e) => {
                    tracing::trace!(change = %change.summary(), error = %e, "change not applicable to this node");
                    previous.cloned()
                }
            },
        };
        update
            .and_then(|cluster| self.startup.with_cluster(cluster))
            .unwrap_or_else(|| NodeContext::alone(self.startup.node().clone()))
    }
}

/// Keeps committed and prepared entries, in order.
fn relevant(history: &[ChangeRequestRecord]) -> VecDeque<ChangeRequestRecord> {
    history
        .iter()
        .filter(|r| {
            matches!(
                r.state(),
                ChangeRequestState::Committed | ChangeRequestState::Prepared
            )
        })
        .cloned()
        .collect()
}

fn check_activation(record: &ChangeRequestRecord, side: Side) -> Result<&Cluster> {
    match record.change().activation_cluster() {
        Some(cluster) if record.state() == ChangeRequestState::Committed => Ok(cluster),
        _ => Err(SyncError::NotActivated {
            side,
            record: Box::new(record.clone()),
        }),
    }
}

/// Index of the last committed source topology change whose resulting
/// topology is the one this node was activated with.
///
/// Entries without a stored result cannot be compared; if none match but
/// the source's current topology does, the whole source history predates
/// this node.
fn find_last_sync_position(
    source: &VecDeque<ChangeRequestRecord>,
    source_topology: &Cluster,
    activation: &Cluster,
) -> Option<usize> {
    source
        .iter()
        .enumerate()
        .filter(|(_, r)| r.state() == ChangeRequestState::Committed && r.change().is_topology())
        .filter(|(_, r)| r.result().is_some_and(|ctx| ctx.cluster().same_topology(activation)))
        .map(|(i, _)| i)
        .last()
        .or_else(|| {
            (source_topology.same_topology(activation) && !source.is_empty())
                .then(|| source.len() - 1)
        })
}

fn reconcile<S: StateStore>(
    server: &mut NomadServer<S>,
    local_all: &[ChangeRequestRecord],
    source_all: &[ChangeRequestRecord],
    local: &mut VecDeque<ChangeRequestRecord>,
    source: &mut VecDeque<ChangeRequestRecord>,
    requires: &mut BTreeSet<Require>,
) -> Result<()> {
    tracing::info!(count = local.len(), "comparing committed and prepared changes");

    let rolled_back: HashSet<ChangeId> = local_all
        .iter()
        .chain(source_all)
        .filter(|r| r.state() == ChangeRequestState::RolledBack)
        .map(|r| r.id)
        .collect();

    // Local entries rolled back on the source.
    let last = local.len().saturating_sub(1);
    for (i, record) in local.iter().enumerate() {
        if !rolled_back.contains(&record.id) {
            continue;
        }
        tracing::trace!(%record, "pass 1: rolled back on source");
        if record.state() == ChangeRequestState::Committed {
            return Err(SyncError::RolledBackOnSource(Box::new(record.clone())));
        }
        if i != last {
            return Err(SyncError::NotLastEntry {
                side: Side::Local,
                record: Box::new(record.clone()),
            });
        }
        repair(server, record, ChangeRequestState::RolledBack, requires)?;
    }

    // Source entries rolled back on this node.
    let last = source.len().saturating_sub(1);
    for (i, record) in source.iter().enumerate() {
        if !rolled_back.contains(&record.id) {
            continue;
        }
        tracing::trace!(%record, "pass 2: rolled back on this node");
        if record.state() == ChangeRequestState::Committed {
            return Err(SyncError::RolledBackLocally(Box::new(record.clone())));
        }
        if i != last {
            return Err(SyncError::NotLastEntry {
                side: Side::Source,
                record: Box::new(record.clone()),
            });
        }
        tracing::warn!(
            change_id = %record.id,
            version = %record.version(),
            "the last change in the source node is prepared, but rolled back in this node; please run the 'repair' command"
        );
    }

    local.retain(|r| !rolled_back.contains(&r.id));
    source.retain(|r| !rolled_back.contains(&r.id));

    while let Some(record) = local.pop_front() {
        tracing::trace!(%record, "pass 3: pairwise comparison");

        let Some(peer) = source.pop_front() else {
            if record.state() == ChangeRequestState::Committed {
                return Err(SyncError::AheadOfSource(Box::new(record)));
            }
            if !local.is_empty() {
                return Err(SyncError::NotLastEntry {
                    side: Side::Local,
                    record: Box::new(record),
                });
            }
            repair(server, &record, ChangeRequestState::RolledBack, requires)?;
            continue;
        };

        if !record.matches(&peer) {
            return Err(SyncError::HistoryMismatch {
                local: Box::new(record),
                peer: Box::new(peer),
            });
        }

        match (record.state(), peer.state()) {
            (ChangeRequestState::Committed, ChangeRequestState::Committed) => {
                tracing::trace!(change_id = %record.id, "match");
            }
            (ChangeRequestState::Prepared, ChangeRequestState::Prepared) => {
                tracing::warn!(
                    change_id = %record.id,
                    version = %record.version(),
                    "the last change in this node and the source node is still prepared; please run the 'repair' command to complete it"
                );
            }
            (ChangeRequestState::Prepared, ChangeRequestState::Committed) => {
                repair(server, &record, ChangeRequestState::Committed, requires)?;
            }
            (ChangeRequestState::Committed, ChangeRequestState::Prepared) => {
                tracing::warn!(
                    change_id = %record.id,
                    version = %record.version(),
                    "the last change in this node is committed, but still prepared in the source node; please run the 'repair' command"
                );
            }
            (state, peer_state) => unreachable!(
                "rolled-back entries were filtered out: {state} vs {peer_state}"
            ),
        }
    }
    Ok(())
}

/// Completes a locally prepared change.
fn repair<S: StateStore>(
    server: &mut NomadServer<S>,
    record: &ChangeRequestRecord,
    target: ChangeRequestState,
    requires: &mut BTreeSet<Require>,
) -> Result<()> {
    tracing::info!(
        version = %record.version(),
        change = %record.change().summary(),
        created = %record.creation_timestamp,
        user = record.creation_user(),
        host = record.creation_host(),
        outcome = %target,
        "repairing prepared change"
    );

    let discover = server.discover();
    let latest_prepared = discover
        .latest_change
        .as_ref()
        .is_some_and(|r| r.state() == ChangeRequestState::Prepared);
    if !latest_prepared {
        return Err(SyncError::NothingToRepair(
            discover
                .latest_change
                .map_or_else(|| "no change".to_string(), |r| r.to_string()),
        ));
    }

    match target {
        ChangeRequestState::Committed => {
            commit(server, record, discover.mutation_count)?;
            requires.insert(Require::RestartRequired);
        }
        _ => rollback(server, record, discover.mutation_count)?,
    }
    Ok(())
}

/// Replays source entries this node has never seen.
fn normal_sync<S: StateStore>(
    server: &mut NomadServer<S>,
    source: &VecDeque<ChangeRequestRecord>,
    requires: &mut BTreeSet<Require>,
) -> Result<()> {
    if source.is_empty() {
        tracing::info!("no configuration change left to sync");
        return Ok(());
    }

    tracing::info!(count = source.len(), "syncing new configuration changes");
    for record in source {
        tracing::debug!(
            version = %record.version(),
            change = %record.change().summary(),
            user = record.creation_user(),
            host = record.creation_host(),
            "syncing change"
        );
        let count = server.discover().mutation_count;
        prepare(server, record, count)?;
        match record.state() {
            ChangeRequestState::Committed => {
                commit(server, record, count.next())?;
                requires.insert(Require::RestartRequired);
            }
            ChangeRequestState::RolledBack => rollback(server, record, count.next())?,
            ChangeRequestState::Prepared => {}
        }
    }
    Ok(())
}

fn stamp(record: &ChangeRequestRecord, count: MutationCount) -> MutationStamp {
    MutationStamp {
        expected_mutation_count: count,
        mutation_host: record.creation_host().to_owned(),
        mutation_user: record.creation_user().to_owned(),
        mutation_timestamp: record.creation_timestamp,
    }
}

fn ensure_accepted(
    operation: &'static str,
    record: &ChangeRequestRecord,
    response: AcceptRejectResponse,
) -> Result<()> {
    if response.is_accepted() {
        return Ok(());
    }
    Err(SyncError::Rejected {
        operation,
        change_id: record.id,
        reason: response.rejection_reason,
        message: response.rejection_message,
    })
}

fn prepare<S: StateStore>(
    server: &mut NomadServer<S>,
    record: &ChangeRequestRecord,
    count: MutationCount,
) -> Result<()> {
    tracing::info!(%record, "prepare");
    let response = server.prepare(PrepareMessage {
        stamp: stamp(record, count),
        change_id: record.id,
        version: record.version(),
        change: record.change().clone(),
    })?;
    ensure_accepted("prepare", record, response)
}

fn commit<S: StateStore>(
    server: &mut NomadServer<S>,
    record: &ChangeRequestRecord,
    count: MutationCount,
) -> Result<()> {
    tracing::info!(%record, "commit");
    let response = server.commit(CommitMessage {
        stamp: stamp(record, count),
        change_id: record.id,
    })?;
    ensure_accepted("commit", record, response)
}

fn rollback<S: StateStore>(
    server: &mut NomadServer<S>,
    record: &ChangeRequestRecord,
    count: MutationCount,
) -> Result<()> {
    tracing::info!(%record, "rollback");
    let response = server.rollback(RollbackMessage {
        stamp: stamp(record, count),
        change_id: record.id,
    })?;
    ensure_accepted("rollback", record, response)
}
