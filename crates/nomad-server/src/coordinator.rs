//! In-process driver for the two-phase protocol.
//!
//! [`ChangeCoordinator`] plays the "active" role against a set of local
//! nodes: it discovers them, prepares a change everywhere, then commits on
//! unanimous acceptance or rolls back the nodes that accepted. Transport
//! between processes is the caller's concern; this type only sequences calls.

use std::sync::Arc;

use nomad_storage::StateStore;
use nomad_types::{Change, ChangeId, ChangeRequestState, ServerMode, Version};

use crate::{
    error::NomadError,
    message::{
        AcceptRejectResponse, CommitMessage, DiscoverResponse, MutationStamp, PrepareMessage,
        RollbackMessage, TakeoverMessage,
    },
    serializing::SerializingNomadServer,
};

/// Errors that abort a coordinated operation.
#[derive(thiserror::Error, Debug)]
pub enum CoordinatorError {
    #[error("no nodes to coordinate")]
    NoNodes,

    #[error("node {node} has a change in progress; run repair first")]
    ChangeInProgress { node: usize },

    #[error("node {node} rejected {operation}: {}", .response.rejection_message.as_deref().unwrap_or("no reason given"))]
    Rejected {
        node: usize,
        operation: &'static str,
        response: AcceptRejectResponse,
    },

    #[error("cannot decide how to repair change {0}: every node has it prepared")]
    RepairUndecidable(ChangeId),

    #[error("change {0} is committed on some nodes and rolled back on others")]
    Inconsistent(ChangeId),

    #[error(transparent)]
    Server(#[from] NomadError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// How a coordinated change ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Committed {
        change_id: ChangeId,
        version: Version,
    },
    RolledBack {
        change_id: ChangeId,
        version: Version,
        /// Node index and response of every node that refused the prepare.
        rejections: Vec<(usize, AcceptRejectResponse)>,
    },
}

/// What `repair` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    NothingToRepair,
    Committed(ChangeId),
    RolledBack(ChangeId),
}

pub struct ChangeCoordinator<S> {
    nodes: Vec<Arc<SerializingNomadServer<S>>>,
    host: String,
    user: String,
}

impl<S: StateStore> ChangeCoordinator<S> {
    pub fn new(
        nodes: Vec<Arc<SerializingNomadServer<S>>>,
        host: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            nodes,
            host: host.into(),
            user: user.into(),
        }
    }

    fn stamp(&self, discover: &DiscoverResponse) -> MutationStamp {
        MutationStamp::new(discover.mutation_count, &self.host, &self.user)
    }

    fn discover_all(&self) -> Result<Vec<DiscoverResponse>> {
        if self.nodes.is_empty() {
            return Err(CoordinatorError::NoNodes);
        }
        Ok(self.nodes.iter().map(|n| n.discover()).collect())
    }

    /// Drives `change` through prepare and commit (or rollback) on every node.
    pub fn run_change(&self, change: Change) -> Result<ChangeOutcome> {
        let discovered = self.discover_all()?;
        if let Some(node) = discovered.iter().position(|d| d.mode != ServerMode::Accepting) {
            return Err(CoordinatorError::ChangeInProgress { node });
        }

        let version = discovered
            .iter()
            .map(|d| d.highest_version)
            .max()
            .unwrap_or(Version::ZERO)
            .next();
        let change_id = ChangeId::generate();
        tracing::info!(%change_id, %version, change = %change.summary(), nodes = self.nodes.len(), "preparing change");

        let mut accepted = Vec::new();
        let mut rejections = Vec::new();
        for (i, (node, d)) in self.nodes.iter().zip(&discovered).enumerate() {
            let response = node.prepare(PrepareMessage {
                stamp: self.stamp(d),
                change_id,
                version,
                change: change.clone(),
            })?;
            if response.is_accepted() {
                accepted.push(i);
            } else {
                tracing::warn!(node = i, reason = ?response.rejection_reason, message = ?response.rejection_message, "prepare rejected");
                rejections.push((i, response));
            }
        }

        if rejections.is_empty() {
            for &i in &accepted {
                self.commit_on(i, change_id)?;
            }
            tracing::info!(%change_id, %version, "change committed");
            Ok(ChangeOutcome::Committed { change_id, version })
        } else {
            for &i in &accepted {
                self.rollback_on(i, change_id)?;
            }
            tracing::info!(%change_id, %version, rejected = rejections.len(), "change rolled back");
            Ok(ChangeOutcome::RolledBack {
                change_id,
                version,
                rejections,
            })
        }
    }

    fn commit_on(&self, node: usize, change_id: ChangeId) -> Result<()> {
        let server = &self.nodes[node];
        let response = server.commit(CommitMessage {
            stamp: self.stamp(&server.discover()),
            change_id,
        })?;
        if !response.is_accepted() {
            return Err(CoordinatorError::Rejected {
                node,
                operation: "commit",
                response,
            });
        }
        Ok(())
    }

    fn rollback_on(&self, node: usize, change_id: ChangeId) -> Result<()> {
        let server = &self.nodes[node];
        let response = server.rollback(RollbackMessage {
            stamp: self.stamp(&server.discover()),
            change_id,
        })?;
        if !response.is_accepted() {
            return Err(CoordinatorError::Rejected {
                node,
                operation: "rollback",
                response,
            });
        }
        Ok(())
    }

    /// Finishes a change left prepared on some nodes.
    ///
    /// If any node committed it, the others commit too; if any rolled it
    /// back, the others roll back. When every node still has it prepared,
    /// `force` decides; without it the repair is refused.
    pub fn repair(&self, force: Option<ChangeRequestState>) -> Result<RepairOutcome> {
        let discovered = self.discover_all()?;

        let Some(change_id) = discovered
            .iter()
            .filter_map(|d| d.latest_change.as_ref())
            .find(|r| r.state() == ChangeRequestState::Prepared)
            .map(|r| r.id)
        else {
            return Ok(RepairOutcome::NothingToRepair);
        };

        let states: Vec<Option<ChangeRequestState>> = self
            .nodes
            .iter()
            .map(|n| n.with_exclusive(|s| s.change(&change_id).map(|r| r.state())))
            .collect();
        let any_committed = states.contains(&Some(ChangeRequestState::Committed));
        let any_rolled_back = states.contains(&Some(ChangeRequestState::RolledBack));

        let decision = match (any_committed, any_rolled_back, force) {
            (true, true, _) => return Err(CoordinatorError::Inconsistent(change_id)),
            (true, false, _) => ChangeRequestState::Committed,
            (false, true, _) => ChangeRequestState::RolledBack,
            (false, false, Some(forced)) if forced.is_terminal() => forced,
            (false, false, _) => return Err(CoordinatorError::RepairUndecidable(change_id)),
        };

        for (i, state) in states.iter().enumerate() {
            if *state != Some(ChangeRequestState::Prepared) {
                continue;
            }
            match decision {
                ChangeRequestState::Committed => self.commit_on(i, change_id)?,
                _ => self.rollback_on(i, change_id)?,
            }
        }

        tracing::info!(%change_id, outcome = %decision, "repaired change");
        Ok(match decision {
            ChangeRequestState::Committed => RepairOutcome::Committed(change_id),
            _ => RepairOutcome::RolledBack(change_id),
        })
    }

    /// Claims every node for this coordinator's host and user.
    pub fn takeover(&self) -> Result<()> {
        for (node, server) in self.nodes.iter().enumerate() {
            let response = server.takeover(TakeoverMessage {
                stamp: self.stamp(&server.discover()),
            })?;
            if !response.is_accepted() {
                tracing::warn!(node, reason = ?response.rejection_reason, "takeover rejected");
                return Err(CoordinatorError::Rejected {
                    node,
                    operation: "takeover",
                    response,
                });
            }
        }
        tracing::info!(host = %self.host, user = %self.user, "took over nodes");
        Ok(())
    }
}
