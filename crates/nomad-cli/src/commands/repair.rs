//! Recovery commands: repair and takeover.

use std::path::Path;

use anyhow::Result;
use nomad_server::RepairOutcome;
use nomad_types::ChangeRequestState;

use crate::node::LocalNode;
use crate::style::{print_hint, print_success};

pub fn repair(project_dir: &Path, force: Option<ChangeRequestState>) -> Result<()> {
    let node = LocalNode::open(project_dir)?;

    match node.coordinator().repair(force)? {
        RepairOutcome::NothingToRepair => print_success("Nothing to repair"),
        RepairOutcome::Committed(id) => print_success(&format!("Committed change {id}")),
        RepairOutcome::RolledBack(id) => print_success(&format!("Rolled back change {id}")),
    }
    Ok(())
}

pub fn takeover(project_dir: &Path) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    node.coordinator().takeover()?;

    let mutation = &node.config.mutation;
    print_success(&format!("Node taken over by {}@{}", mutation.user, mutation.host));
    print_hint("Coordinators holding an older mutation count will now be refused.");
    Ok(())
}
