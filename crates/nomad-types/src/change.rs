//! Configuration changes carried by the protocol.
//!
//! A [`Change`] is an opaque payload as far as the two-phase-commit machinery
//! is concerned; only applicators interpret it. Each variant knows how to
//! produce the cluster it leads to via [`Change::apply_to`].

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::topology::{Cluster, Node, Settings};

/// Errors raised when a change cannot be applied to a cluster.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangeError {
    #[error("cluster is not activated")]
    NotActivated,

    #[error("cluster is already activated")]
    AlreadyActivated,

    #[error("cluster must contain at least one node")]
    EmptyCluster,

    #[error("unknown stripe: {0}")]
    UnknownStripe(String),

    #[error("unknown node {node} in stripe {stripe}")]
    UnknownNode { stripe: String, node: String },

    #[error("node {0} already exists in the cluster")]
    DuplicateNode(String),

    #[error("cannot remove {node}: it is the last node of stripe {stripe}")]
    LastNodeInStripe { stripe: String, node: String },

    #[error("invalid setting name: {0:?}")]
    InvalidSettingName(String),

    #[error("setting {0} requires a value")]
    MissingValue(String),

    #[error("setting {name} is not set on {target}")]
    SettingNotFound { name: String, target: Applicability },

    #[error("multi-setting change must contain at least one setting")]
    EmptyMultiSetting,
}

// ============================================================================
// Settings
// ============================================================================

/// Where in the cluster a setting applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Applicability {
    Cluster,
    Stripe { stripe: String },
    Node { stripe: String, node: String },
}

impl Applicability {
    /// Returns true if a change at this level affects `node` in `stripe`.
    pub fn covers(&self, stripe: &str, node: &str) -> bool {
        match self {
            Self::Cluster => true,
            Self::Stripe { stripe: s } => s == stripe,
            Self::Node { stripe: s, node: n } => s == stripe && n == node,
        }
    }
}

impl Display for Applicability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster => f.write_str("cluster"),
            Self::Stripe { stripe } => write!(f, "stripe:{stripe}"),
            Self::Node { stripe, node } => write!(f, "node:{stripe}/{node}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingOp {
    Set,
    Unset,
}

/// Sets or unsets one named setting at one level of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SettingChange {
    pub op: SettingOp,
    pub applicability: Applicability,
    pub name: String,
    pub value: Option<String>,
}

impl SettingChange {
    pub fn set(applicability: Applicability, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: SettingOp::Set,
            applicability,
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn unset(applicability: Applicability, name: impl Into<String>) -> Self {
        Self {
            op: SettingOp::Unset,
            applicability,
            name: name.into(),
            value: None,
        }
    }

    /// Checks the change is well-formed, independent of any cluster.
    pub fn validate(&self) -> Result<(), ChangeError> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_name {
            return Err(ChangeError::InvalidSettingName(self.name.clone()));
        }
        if self.op == SettingOp::Set && self.value.is_none() {
            return Err(ChangeError::MissingValue(self.name.clone()));
        }
        Ok(())
    }

    /// Applies this setting to `cluster` in place.
    pub fn apply_to(&self, cluster: &mut Cluster) -> Result<(), ChangeError> {
        self.validate()?;
        let settings = self.target_settings(cluster)?;
        match self.op {
            SettingOp::Set => {
                let value = self
                    .value
                    .clone()
                    .ok_or_else(|| ChangeError::MissingValue(self.name.clone()))?;
                settings.insert(self.name.clone(), value);
            }
            SettingOp::Unset => {
                if settings.remove(&self.name).is_none() {
                    return Err(ChangeError::SettingNotFound {
                        name: self.name.clone(),
                        target: self.applicability.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn target_settings<'a>(&self, cluster: &'a mut Cluster) -> Result<&'a mut Settings, ChangeError> {
        match &self.applicability {
            Applicability::Cluster => Ok(&mut cluster.settings),
            Applicability::Stripe { stripe } => cluster
                .stripe_mut(stripe)
                .map(|s| &mut s.settings)
                .ok_or_else(|| ChangeError::UnknownStripe(stripe.clone())),
            Applicability::Node { stripe, node } => {
                let s = cluster
                    .stripe_mut(stripe)
                    .ok_or_else(|| ChangeError::UnknownStripe(stripe.clone()))?;
                s.node_mut(node)
                    .map(|n| &mut n.settings)
                    .ok_or_else(|| ChangeError::UnknownNode {
                        stripe: stripe.clone(),
                        node: node.clone(),
                    })
            }
        }
    }

    pub fn summary(&self) -> String {
        match (&self.op, &self.value) {
            (SettingOp::Set, Some(value)) => {
                format!("set {}={} on {}", self.name, value, self.applicability)
            }
            _ => format!("unset {} on {}", self.name, self.applicability),
        }
    }
}

// ============================================================================
// Changes
// ============================================================================

/// A configuration change proposed to the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    /// First change of every history: installs the initial topology.
    ClusterActivation { cluster: Cluster },
    Setting(SettingChange),
    /// Several settings applied atomically.
    MultiSetting { changes: Vec<SettingChange> },
    NodeAddition { stripe: String, node: Node },
    NodeRemoval { stripe: String, node: String },
}

impl Change {
    /// Human-readable one-line description.
    pub fn summary(&self) -> String {
        match self {
            Self::ClusterActivation { cluster } => format!(
                "activate cluster {} ({} stripes, {} nodes)",
                cluster.name,
                cluster.stripes.len(),
                cluster.node_count()
            ),
            Self::Setting(setting) => setting.summary(),
            Self::MultiSetting { changes } => changes
                .iter()
                .map(SettingChange::summary)
                .collect::<Vec<_>>()
                .join("; "),
            Self::NodeAddition { stripe, node } => {
                format!("attach node {} ({}) to stripe {stripe}", node.name, node.address())
            }
            Self::NodeRemoval { stripe, node } => {
                format!("detach node {node} from stripe {stripe}")
            }
        }
    }

    pub fn is_activation(&self) -> bool {
        matches!(self, Self::ClusterActivation { .. })
    }

    /// Returns true for changes that alter cluster membership.
    pub fn is_topology(&self) -> bool {
        matches!(
            self,
            Self::ClusterActivation { .. } | Self::NodeAddition { .. } | Self::NodeRemoval { .. }
        )
    }

    pub fn activation_cluster(&self) -> Option<&Cluster> {
        match self {
            Self::ClusterActivation { cluster } => Some(cluster),
            _ => None,
        }
    }

    /// Computes the cluster that results from applying this change to
    /// `existing`. Activation is the only change valid on `None`.
    pub fn apply_to(&self, existing: Option<&Cluster>) -> Result<Cluster, ChangeError> {
        if let Self::ClusterActivation { cluster } = self {
            if existing.is_some() {
                return Err(ChangeError::AlreadyActivated);
            }
            if cluster.node_count() == 0 {
                return Err(ChangeError::EmptyCluster);
            }
            return Ok(cluster.clone());
        }

        let mut cluster = existing.cloned().ok_or(ChangeError::NotActivated)?;
        match self {
            Self::ClusterActivation { .. } => unreachable!("handled above"),
            Self::Setting(setting) => setting.apply_to(&mut cluster)?,
            Self::MultiSetting { changes } => {
                if changes.is_empty() {
                    return Err(ChangeError::EmptyMultiSetting);
                }
                for setting in changes {
                    setting.apply_to(&mut cluster)?;
                }
            }
            Self::NodeAddition { stripe, node } => {
                if cluster.contains_node(&node.name) {
                    return Err(ChangeError::DuplicateNode(node.name.clone()));
                }
                cluster
                    .stripe_mut(stripe)
                    .ok_or_else(|| ChangeError::UnknownStripe(stripe.clone()))?
                    .nodes
                    .push(node.clone());
            }
            Self::NodeRemoval { stripe, node } => {
                let s = cluster
                    .stripe_mut(stripe)
                    .ok_or_else(|| ChangeError::UnknownStripe(stripe.clone()))?;
                let pos = s.nodes.iter().position(|n| &n.name == node).ok_or_else(|| {
                    ChangeError::UnknownNode {
                        stripe: stripe.clone(),
                        node: node.clone(),
                    }
                })?;
                if s.nodes.len() == 1 {
                    return Err(ChangeError::LastNodeInStripe {
                        stripe: stripe.clone(),
                        node: node.clone(),
                    });
                }
                s.nodes.remove(pos);
            }
        }
        Ok(cluster)
    }
}

impl Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Stripe;
    use test_case::test_case;

    fn cluster() -> Cluster {
        Cluster::new(
            "prod",
            vec![
                Stripe::new(
                    "s1",
                    vec![Node::new("n1", "host1", 9410), Node::new("n2", "host2", 9410)],
                ),
                Stripe::new("s2", vec![Node::new("n3", "host3", 9410)]),
            ],
        )
    }

    #[test]
    fn activation_only_valid_on_empty() {
        let change = Change::ClusterActivation { cluster: cluster() };
        assert_eq!(change.apply_to(None).unwrap(), cluster());
        assert_eq!(
            change.apply_to(Some(&cluster())),
            Err(ChangeError::AlreadyActivated)
        );
    }

    #[test]
    fn activation_rejects_empty_cluster() {
        let change = Change::ClusterActivation {
            cluster: Cluster::new("empty", vec![]),
        };
        assert_eq!(change.apply_to(None), Err(ChangeError::EmptyCluster));
    }

    #[test]
    fn settings_need_an_activated_cluster() {
        let change = Change::Setting(SettingChange::set(Applicability::Cluster, "offheap", "1GB"));
        assert_eq!(change.apply_to(None), Err(ChangeError::NotActivated));
    }

    #[test_case(Applicability::Cluster; "cluster level")]
    #[test_case(Applicability::Stripe { stripe: "s1".into() }; "stripe level")]
    #[test_case(Applicability::Node { stripe: "s1".into(), node: "n2".into() }; "node level")]
    fn set_then_unset_restores_cluster(applicability: Applicability) {
        let original = cluster();
        let set = Change::Setting(SettingChange::set(applicability.clone(), "log-dir", "/logs"));
        let after_set = set.apply_to(Some(&original)).unwrap();
        assert_ne!(after_set, original);
        assert!(after_set.same_topology(&original));

        let unset = Change::Setting(SettingChange::unset(applicability, "log-dir"));
        assert_eq!(unset.apply_to(Some(&after_set)).unwrap(), original);
    }

    #[test]
    fn unset_missing_setting_fails() {
        let change = Change::Setting(SettingChange::unset(Applicability::Cluster, "nope"));
        assert!(matches!(
            change.apply_to(Some(&cluster())),
            Err(ChangeError::SettingNotFound { .. })
        ));
    }

    #[test_case("" ; "empty")]
    #[test_case("has space" ; "whitespace")]
    #[test_case("a=b" ; "equals sign")]
    fn invalid_setting_names(name: &str) {
        let setting = SettingChange::set(Applicability::Cluster, name, "v");
        assert!(matches!(setting.validate(), Err(ChangeError::InvalidSettingName(_))));
    }

    #[test]
    fn set_without_value_is_rejected() {
        let setting = SettingChange {
            op: SettingOp::Set,
            applicability: Applicability::Cluster,
            name: "x".into(),
            value: None,
        };
        assert_eq!(setting.validate(), Err(ChangeError::MissingValue("x".into())));
    }

    #[test]
    fn multi_setting_is_all_or_nothing() {
        let change = Change::MultiSetting {
            changes: vec![
                SettingChange::set(Applicability::Cluster, "a", "1"),
                SettingChange::set(Applicability::Stripe { stripe: "s9".into() }, "b", "2"),
            ],
        };
        assert_eq!(
            change.apply_to(Some(&cluster())),
            Err(ChangeError::UnknownStripe("s9".into()))
        );
        let empty = Change::MultiSetting { changes: vec![] };
        assert_eq!(empty.apply_to(Some(&cluster())), Err(ChangeError::EmptyMultiSetting));
    }

    #[test]
    fn node_addition_and_removal() {
        let add = Change::NodeAddition {
            stripe: "s2".into(),
            node: Node::new("n4", "host4", 9410),
        };
        let grown = add.apply_to(Some(&cluster())).unwrap();
        assert_eq!(grown.node_count(), 4);
        assert!(!grown.same_topology(&cluster()));

        assert_eq!(
            add.apply_to(Some(&grown)),
            Err(ChangeError::DuplicateNode("n4".into()))
        );

        let remove = Change::NodeRemoval {
            stripe: "s2".into(),
            node: "n4".into(),
        };
        assert!(remove.apply_to(Some(&grown)).unwrap().same_topology(&cluster()));
    }

    #[test]
    fn cannot_remove_last_node_of_stripe() {
        let remove = Change::NodeRemoval {
            stripe: "s2".into(),
            node: "n3".into(),
        };
        assert!(matches!(
            remove.apply_to(Some(&cluster())),
            Err(ChangeError::LastNodeInStripe { .. })
        ));
    }

    #[test]
    fn classification() {
        let activation = Change::ClusterActivation { cluster: cluster() };
        assert!(activation.is_activation());
        assert!(activation.is_topology());
        assert_eq!(activation.activation_cluster(), Some(&cluster()));

        let setting = Change::Setting(SettingChange::set(Applicability::Cluster, "a", "1"));
        assert!(!setting.is_topology());
        assert_eq!(setting.summary(), "set a=1 on cluster");
    }

    #[test]
    fn applicability_coverage() {
        assert!(Applicability::Cluster.covers("s1", "n1"));
        let stripe = Applicability::Stripe { stripe: "s1".into() };
        assert!(stripe.covers("s1", "n2"));
        assert!(!stripe.covers("s2", "n3"));
        let node = Applicability::Node {
            stripe: "s1".into(),
            node: "n1".into(),
        };
        assert!(node.covers("s1", "n1"));
        assert!(!node.covers("s1", "n2"));
    }
}
