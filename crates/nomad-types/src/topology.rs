//! Cluster model that configuration changes act upon.
//!
//! A [`Cluster`] is an ordered list of [`Stripe`]s, each an ordered list of
//! [`Node`]s. Every level carries a free-form settings map. The model is a
//! plain value: changes produce new clusters rather than mutating shared ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form configuration settings, ordered for stable hashing.
pub type Settings = BTreeMap<String, String>;

/// A single server process taking part in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub settings: Settings,
}

impl Node {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
            port,
            settings: Settings::new(),
        }
    }

    /// Returns `hostname:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// A replicated group of nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stripe {
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub settings: Settings,
}

impl Stripe {
    pub fn new(name: impl Into<String>, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            nodes,
            settings: Settings::new(),
        }
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }
}

/// The full cluster topology plus cluster-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub stripes: Vec<Stripe>,
    #[serde(default)]
    pub settings: Settings,
}

impl Cluster {
    pub fn new(name: impl Into<String>, stripes: Vec<Stripe>) -> Self {
        Self {
            name: name.into(),
            stripes,
            settings: Settings::new(),
        }
    }

    pub fn stripe(&self, name: &str) -> Option<&Stripe> {
        self.stripes.iter().find(|s| s.name == name)
    }

    pub fn stripe_mut(&mut self, name: &str) -> Option<&mut Stripe> {
        self.stripes.iter_mut().find(|s| s.name == name)
    }

    /// Finds a node by name together with the stripe it belongs to.
    pub fn find_node(&self, name: &str) -> Option<(&Stripe, &Node)> {
        self.stripes
            .iter()
            .find_map(|s| s.node(name).map(|n| (s, n)))
    }

    pub fn contains_node(&self, name: &str) -> bool {
        self.find_node(name).is_some()
    }

    pub fn node_count(&self) -> usize {
        self.stripes.iter().map(|s| s.nodes.len()).sum()
    }

    /// Iterates over every node in stripe order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.stripes.iter().flat_map(|s| s.nodes.iter())
    }

    /// Returns true if both clusters have the same shape and membership.
    ///
    /// Settings are ignored: two clusters that differ only in configured
    /// values still describe the same topology.
    pub fn same_topology(&self, other: &Cluster) -> bool {
        self.name == other.name
            && self.stripes.len() == other.stripes.len()
            && self.stripes.iter().zip(&other.stripes).all(|(a, b)| {
                a.name == b.name
                    && a.nodes.len() == b.nodes.len()
                    && a.nodes.iter().zip(&b.nodes).all(|(x, y)| {
                        x.name == y.name && x.hostname == y.hostname && x.port == y.port
                    })
            })
    }
}

/// A cluster as seen from one of its nodes.
///
/// The node name is always resolvable in the cluster; constructors enforce
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeContext {
    cluster: Cluster,
    node_name: String,
}

impl NodeContext {
    /// Builds a context for `node_name` inside `cluster`.
    ///
    /// Returns `None` if the cluster does not contain the node.
    pub fn new(cluster: Cluster, node_name: impl Into<String>) -> Option<Self> {
        let node_name = node_name.into();
        cluster.contains_node(&node_name).then_some(Self {
            cluster,
            node_name,
        })
    }

    /// Wraps a single node in a one-stripe cluster named after it.
    pub fn alone(node: Node) -> Self {
        let node_name = node.name.clone();
        let stripe = Stripe::new("stripe-1", vec![node]);
        Self {
            cluster: Cluster::new(node_name.clone(), vec![stripe]),
            node_name,
        }
    }

    /// Re-targets this context at another cluster, keeping the same node.
    pub fn with_cluster(&self, cluster: Cluster) -> Option<Self> {
        Self::new(cluster, self.node_name.clone())
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn node(&self) -> &Node {
        // Constructors guarantee membership.
        self.cluster
            .find_node(&self.node_name)
            .map(|(_, n)| n)
            .unwrap_or_else(|| unreachable!("node {} missing from its context", self.node_name))
    }

    pub fn stripe(&self) -> &Stripe {
        self.cluster
            .find_node(&self.node_name)
            .map(|(s, _)| s)
            .unwrap_or_else(|| unreachable!("node {} missing from its context", self.node_name))
    }

    pub fn into_cluster(self) -> Cluster {
        self.cluster
    }
}
