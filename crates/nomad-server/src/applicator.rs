//! Change applicators.
//!
//! The state machine never interprets a [`Change`]; it asks a
//! [`ChangeApplicator`] whether a change is acceptable (`try_apply`, during
//! prepare) and later tells it to make a committed change live (`apply`,
//! during commit).

use std::sync::Arc;

use nomad_types::{Change, NodeContext};
use parking_lot::RwLock;

/// Error returned when a committed change cannot be made live.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ApplyError(pub String);

/// Verdict of [`ChangeApplicator::try_apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PotentialApplicationResult {
    /// The change is acceptable and would produce this configuration.
    Allowed(NodeContext),
    /// The change is refused, with a reason for the operator.
    Rejected(String),
}

impl PotentialApplicationResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed(_))
    }
}

/// Domain logic plugged into a [`NomadServer`](crate::NomadServer).
pub trait ChangeApplicator: Send {
    /// Projects `change` onto `existing` without side effects.
    fn try_apply(&self, existing: Option<&NodeContext>, change: &Change)
    -> PotentialApplicationResult;

    /// Makes a committed change live.
    ///
    /// `prospective` is the configuration computed when the change was
    /// prepared, if any.
    fn apply(&mut self, change: &Change, prospective: Option<&NodeContext>)
    -> Result<(), ApplyError>;
}

// ============================================================================
// Runtime configuration
// ============================================================================

/// Shared handle to the configuration a node is currently running with.
///
/// Cloning the handle shares the underlying value.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    inner: Arc<RwLock<Option<NodeContext>>>,
}

impl RuntimeConfig {
    pub fn new(initial: Option<NodeContext>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn get(&self) -> Option<NodeContext> {
        self.inner.read().clone()
    }

    pub fn set(&self, config: NodeContext) {
        *self.inner.write() = Some(config);
    }
}

// ============================================================================
// Routing applicator
// ============================================================================

/// Routes each [`Change`] variant to the rule that validates it.
#[derive(Debug, Clone)]
pub struct ConfigChangeApplicator {
    node_name: String,
    runtime: RuntimeConfig,
}

impl ConfigChangeApplicator {
    pub fn new(node_name: impl Into<String>, runtime: RuntimeConfig) -> Self {
        Self {
            node_name: node_name.into(),
            runtime,
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    fn project(
        &self,
        existing: Option<&NodeContext>,
        change: &Change,
    ) -> Result<NodeContext, String> {
        match change {
            Change::ClusterActivation { cluster } => {
                if existing.is_some() {
                    return Err("cluster is already activated".into());
                }
                let cluster = change.apply_to(None).map_err(|e| e.to_string())?;
                NodeContext::new(cluster, self.node_name.clone()).ok_or_else(|| {
                    format!(
                        "node {} is not part of cluster {}",
                        self.node_name, cluster_name(change)
                    )
                })
            }
            Change::Setting(_) | Change::MultiSetting { .. } | Change::NodeAddition { .. } => {
                self.project_onto(existing, change)
            }
            Change::NodeRemoval { node, .. } => {
                if node == &self.node_name {
                    return Err(format!("node {node} cannot detach itself"));
                }
                self.project_onto(existing, change)
            }
        }
    }

    fn project_onto(
        &self,
        existing: Option<&NodeContext>,
        change: &Change,
    ) -> Result<NodeContext, String> {
        let existing = existing.ok_or_else(|| "cluster is not activated".to_string())?;
        let cluster = change
            .apply_to(Some(existing.cluster()))
            .map_err(|e| e.to_string())?;
        existing
            .with_cluster(cluster)
            .ok_or_else(|| format!("node {} would no longer be part of the cluster", self.node_name))
    }
}

fn cluster_name(change: &Change) -> &str {
    change.activation_cluster().map_or("?", |c| c.name.as_str())
}

impl ChangeApplicator for ConfigChangeApplicator {
    fn try_apply(
        &self,
        existing: Option<&NodeContext>,
        change: &Change,
    ) -> PotentialApplicationResult {
        match self.project(existing, change) {
            Ok(ctx) => PotentialApplicationResult::Allowed(ctx),
            Err(reason) => {
                tracing::debug!(node = %self.node_name, %reason, "change refused");
                PotentialApplicationResult::Rejected(reason)
            }
        }
    }

    fn apply(
        &mut self,
        change: &Change,
        prospective: Option<&NodeContext>,
    ) -> Result<(), ApplyError> {
        let next = match prospective {
            Some(ctx) => ctx.clone(),
            None => self
                .project(self.runtime.get().as_ref(), change)
                .map_err(ApplyError)?,
        };
        tracing::info!(node = %self.node_name, change = %change.summary(), "applied change to runtime");
        self.runtime.set(next);
        Ok(())
    }
}
