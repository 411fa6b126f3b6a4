//! Read-only commands: discover and history.

use std::path::Path;

use anyhow::{Context, Result};
use nomad_types::ChangeRequestRecord;

use crate::node::LocalNode;
use crate::style::{colors::SemanticStyle, print_info_table, print_table, print_warn};

fn or_dash(value: Option<impl ToString>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn describe(record: Option<&ChangeRequestRecord>) -> String {
    record.map_or_else(
        || "-".to_string(),
        |r| format!("#{} {} [{}]", r.version(), r.change().summary(), r.state()),
    )
}

pub fn discover(project_dir: &Path, json: bool) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    let d = node.server.discover();

    if json {
        let out = serde_json::to_string_pretty(&d).context("Failed to serialize state")?;
        println!("{out}");
        return Ok(());
    }

    println!("{}", format!("Node {}", node.config.node.name).header());
    print_info_table(&[
        ("Mode", d.mode.to_string()),
        ("Mutation count", d.mutation_count.to_string()),
        ("Last mutation host", or_dash(d.last_mutation_host.as_deref())),
        ("Last mutation user", or_dash(d.last_mutation_user.as_deref())),
        (
            "Last mutation at",
            or_dash(d.last_mutation_timestamp.map(|t| t.to_rfc3339())),
        ),
        ("Current version", d.current_version.to_string()),
        ("Highest version", d.highest_version.to_string()),
        ("Latest change", describe(d.latest_change.as_ref())),
        (
            "Latest committed change",
            describe(d.latest_committed_change.as_ref()),
        ),
    ]);

    if node.server.with_exclusive(|s| s.has_incomplete_change()) {
        print_warn("A change is still prepared; run `nomad repair` to complete it.");
    }
    Ok(())
}

pub fn history(project_dir: &Path, json: bool) -> Result<()> {
    let node = LocalNode::open(project_dir)?;
    let records = node.server.with_exclusive(|s| s.change_history());

    if json {
        let out = serde_json::to_string_pretty(&records).context("Failed to serialize history")?;
        println!("{out}");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            vec![
                r.version().to_string(),
                r.state().to_string(),
                r.change().summary(),
                format!("{}@{}", r.creation_user(), r.creation_host()),
                r.creation_timestamp.to_rfc3339(),
                r.id.to_string(),
            ]
        })
        .collect();
    print_table(
        &["Version", "State", "Change", "Author", "Created", "Id"],
        &rows,
        "change",
    );
    Ok(())
}
