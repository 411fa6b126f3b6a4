//! Configuration change commands.
//!
//! Each command builds one [`Change`] and drives it through prepare and
//! commit on the local node.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nomad_server::ChangeOutcome;
use nomad_types::{Applicability, Change, Cluster, Node, NodeContext, SettingChange};

use crate::node::LocalNode;
use crate::style::{print_labeled, print_rejection, print_success};

fn run_change(project_dir: &Path, change: Change) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    let summary = change.summary();

    match node.coordinator().run_change(change)? {
        ChangeOutcome::Committed { change_id, version } => {
            print_success(&format!("Committed: {summary}"));
            print_labeled("Change", change_id);
            print_labeled("Version", version);
            Ok(())
        }
        ChangeOutcome::RolledBack { rejections, .. } => {
            for (_, response) in &rejections {
                print_rejection(&node.config.node.name, response);
            }
            anyhow::bail!("Change rejected and rolled back: {summary}")
        }
    }
}

pub fn activate(project_dir: &Path, cluster_file: Option<&Path>, name: &str) -> Result<()> {
    let cluster = match cluster_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<Cluster>(&text)
                .with_context(|| format!("Invalid cluster definition in {}", path.display()))?
        }
        None => {
            let node = LocalNode::open(project_dir)?;
            let mut cluster = NodeContext::alone(node.node()).into_cluster();
            cluster.name = name.to_string();
            cluster
        }
    };
    run_change(project_dir, Change::ClusterActivation { cluster })
}

fn applicability(stripe: Option<String>, node: Option<String>) -> Applicability {
    match (stripe, node) {
        (Some(stripe), Some(node)) => Applicability::Node { stripe, node },
        (Some(stripe), None) => Applicability::Stripe { stripe },
        // clap enforces --stripe with --node
        (None, _) => Applicability::Cluster,
    }
}

pub fn set(
    project_dir: &Path,
    setting: &str,
    value: &str,
    stripe: Option<String>,
    node: Option<String>,
) -> Result<()> {
    let change = SettingChange::set(applicability(stripe, node), setting, value);
    change.validate()?;
    run_change(project_dir, Change::Setting(change))
}

pub fn unset(
    project_dir: &Path,
    setting: &str,
    stripe: Option<String>,
    node: Option<String>,
) -> Result<()> {
    let change = SettingChange::unset(applicability(stripe, node), setting);
    change.validate()?;
    run_change(project_dir, Change::Setting(change))
}

pub fn attach(project_dir: &Path, stripe: &str, name: &str, hostname: &str, port: u16) -> Result<()> {
    run_change(
        project_dir,
        Change::NodeAddition {
            stripe: stripe.to_string(),
            node: Node::new(name, hostname, port),
        },
    )
}

pub fn detach(project_dir: &Path, stripe: &str, node: &str) -> Result<()> {
    run_change(
        project_dir,
        Change::NodeRemoval {
            stripe: stripe.to_string(),
            node: node.to_string(),
        },
    )
}
