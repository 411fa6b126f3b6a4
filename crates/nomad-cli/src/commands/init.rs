//! Initialize command - describes the local node in a project directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nomad_config::{NomadConfig, Paths, STATE_DIR_NAME};

use crate::node::LocalNode;
use crate::style::{print_hint, print_labeled, print_success};

pub fn run(project_dir: &Path, name: &str, hostname: &str, port: u16, force: bool) -> Result<()> {
    if Paths::is_initialized(project_dir) && !force {
        anyhow::bail!(
            "Project already initialized in {}. Use --force to overwrite nomad.toml.",
            project_dir.display()
        );
    }

    fs::create_dir_all(project_dir).context("Failed to create project directory")?;

    let config = NomadConfig::for_node(name, hostname, port);
    config.validate()?;
    let config_path = config
        .write_project_file(project_dir)
        .context("Failed to write nomad.toml")?;
    print_success(&format!("Wrote {}", config_path.display()));

    let gitignore = project_dir.join(".gitignore");
    if !gitignore.exists() {
        let ignored = format!("# Nomad node state\n{STATE_DIR_NAME}/\nnomad.local.toml\n");
        fs::write(&gitignore, ignored).context("Failed to write .gitignore")?;
    }

    // Opening creates and initializes the store.
    let node = LocalNode::open(project_dir)?;
    print_success("Initialized node state");
    print_labeled("Node", &format!("{name} ({hostname}:{port})"));
    print_labeled("Data", node.config.node.data_dir.display());
    print_hint("Next: nomad activate --cluster <cluster.toml>");

    Ok(())
}
