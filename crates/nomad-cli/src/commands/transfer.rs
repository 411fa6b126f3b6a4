//! History transfer commands: export and sync.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nomad_sync::{HistorySynchronizer, Require, SyncOptions, SyncPayload};

use crate::node::LocalNode;
use crate::style::{print_labeled, print_success, print_warn};

pub fn export(project_dir: &Path, path: &Path) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    let payload = node
        .server
        .with_exclusive(|s| SyncPayload::export(s))
        .context("Nothing to export")?;
    let bytes = payload.encode()?;
    fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;

    print_success(&format!(
        "Exported {} changes to {}",
        payload.history.len(),
        path.display()
    ));
    print_labeled("Topology", &payload.source_topology.name);
    Ok(())
}

pub fn sync(project_dir: &Path, path: &Path) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let payload = SyncPayload::decode(&bytes)?;

    let options = SyncOptions {
        zap_on_reset: node.config.sync.zap_on_reset,
    };
    let synchronizer = HistorySynchronizer::new(node.startup_config(), options);
    let requires = synchronizer
        .sync_serialized(&node.server, &payload)
        .context("History sync failed")?;

    print_success("History in sync with the source node");
    for require in &requires {
        match require {
            Require::Nothing => {}
            Require::RestartRequired => print_warn("Restart required to apply new changes"),
            Require::ZapRequired => print_warn("Zap required: wipe this node's data before restart"),
        }
    }
    let names: Vec<String> = requires.iter().map(ToString::to_string).collect();
    println!("{}", names.join(","));
    Ok(())
}
