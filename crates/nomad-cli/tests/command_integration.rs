//! Integration tests for CLI commands.
//!
//! Each test works in its own temporary project directories with the file
//! store, so commands see each other's effects across invocations.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CLUSTER: &str = r#"
name = "prod"

[[stripes]]
name = "s1"

[[stripes.nodes]]
name = "n1"
hostname = "localhost"
port = 9410

[[stripes.nodes]]
name = "n2"
hostname = "localhost"
port = 9411
"#;

fn nomad(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("nomad").unwrap();
    cmd.arg("--dir").arg(dir).arg("--no-color");
    cmd
}

fn init(dir: &Path, name: &str, port: u16) {
    nomad(dir)
        .args(["init", "--name", name, "--port", &port.to_string()])
        .assert()
        .success();
}

fn activate_with_file(dir: &Path, cluster_file: &Path) {
    nomad(dir)
        .arg("activate")
        .arg("--cluster")
        .arg(cluster_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed"));
}

/// A project with node n1 activated on the two-node cluster.
fn activated_project() -> (TempDir, std::path::PathBuf) {
    let temp = TempDir::new().unwrap();
    let cluster_file = temp.path().join("cluster.toml");
    fs::write(&cluster_file, CLUSTER).unwrap();

    let dir = temp.path().join("n1");
    init(&dir, "n1", 9410);
    activate_with_file(&dir, &cluster_file);
    (temp, dir)
}

// ============================================================================
// Init
// ============================================================================

#[test]
fn init_writes_config_and_state() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);

    let config = fs::read_to_string(temp.path().join("nomad.toml")).unwrap();
    assert!(config.contains("name = \"n1\""));
    assert!(temp.path().join(".nomad/data/nomad.log").exists());
    let ignored = fs::read_to_string(temp.path().join(".gitignore")).unwrap();
    assert!(ignored.lines().any(|line| line == ".nomad/"));
}

#[test]
fn init_refuses_to_overwrite() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);

    nomad(temp.path())
        .args(["init", "--name", "n1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already initialized"));

    nomad(temp.path())
        .args(["init", "--name", "n1", "--force"])
        .assert()
        .success();
}

#[test]
fn commands_require_init() {
    let temp = TempDir::new().unwrap();
    nomad(temp.path())
        .arg("discover")
        .assert()
        .failure()
        .stderr(predicate::str::contains("nomad init"));
}

#[test]
fn invalid_environment_override_is_reported() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);

    nomad(temp.path())
        .env("NOMAD_LOGGING__LEVEL", "chatty")
        .arg("discover")
        .assert()
        .failure()
        .stderr(predicate::str::contains("logging.level"));
}

// ============================================================================
// Changes
// ============================================================================

#[test]
fn activate_alone_then_set() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);

    nomad(temp.path())
        .args(["activate", "--name", "solo"])
        .assert()
        .success();
    nomad(temp.path())
        .args(["set", "offheap", "512MB"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Version: 2"));

    nomad(temp.path())
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COMMITTED"))
        .stdout(predicate::str::contains("offheap"))
        .stdout(predicate::str::contains("solo"));
}

#[test]
fn second_activation_is_rejected() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .args(["activate", "--name", "again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already activated"));
}

#[test]
fn change_before_activation_is_rejected() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);
    nomad(temp.path())
        .args(["set", "offheap", "512MB"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not activated"));
}

#[test]
fn node_cannot_detach_itself() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .args(["detach", "--stripe", "s1", "--node", "n1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot detach itself"))
        .stderr(predicate::str::contains("node n1 UNACCEPTABLE"));
}

#[test]
fn attach_and_detach_other_node() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .args([
            "attach", "--stripe", "s1", "--name", "n3", "--hostname", "localhost", "--port",
            "9412",
        ])
        .assert()
        .success();
    nomad(&dir)
        .args(["detach", "--stripe", "s1", "--node", "n3"])
        .assert()
        .success();
    nomad(&dir)
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("(3 changes)"));
}

#[test]
fn invalid_setting_name_is_refused() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .args(["set", "bad name!", "1"])
        .assert()
        .failure();
}

#[test]
fn node_setting_requires_stripe() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .args(["set", "offheap", "1GB", "--node", "n1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--stripe"));
}

// ============================================================================
// Inspection and recovery
// ============================================================================

#[test]
fn discover_reports_state() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .arg("discover")
        .assert()
        .success()
        .stdout(predicate::str::contains("ACCEPTING"))
        .stdout(predicate::str::contains("Node n1"));

    nomad(&dir)
        .args(["discover", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mutation_count\": 2"));
}

#[test]
fn repair_with_nothing_prepared() {
    let (_temp, dir) = activated_project();
    nomad(&dir)
        .arg("repair")
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to repair"));
}

#[test]
fn takeover_bumps_mutation_count() {
    let (_temp, dir) = activated_project();
    nomad(&dir).arg("takeover").assert().success();
    nomad(&dir)
        .args(["discover", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"mutation_count\": 3"));
}

// ============================================================================
// Export and sync
// ============================================================================

#[test]
fn sync_replays_source_changes() {
    let (temp, n1) = activated_project();
    let cluster_file = temp.path().join("cluster.toml");
    let n2 = temp.path().join("n2");
    init(&n2, "n2", 9411);
    activate_with_file(&n2, &cluster_file);

    nomad(&n1).args(["set", "offheap", "512MB"]).assert().success();
    let payload = temp.path().join("payload.bin");
    nomad(&n1)
        .arg("export")
        .arg(&payload)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 changes"));

    nomad(&n2)
        .arg("sync")
        .arg(&payload)
        .assert()
        .success()
        .stdout(predicate::str::contains("RESTART_REQUIRED"));
    nomad(&n2)
        .args(["history", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("offheap"));

    // Already in sync.
    nomad(&n2)
        .arg("sync")
        .arg(&payload)
        .assert()
        .success()
        .stdout(predicate::str::contains("NOTHING"));
}

#[test]
fn sync_rejects_ahead_node() {
    let (temp, n1) = activated_project();
    let payload = temp.path().join("payload.bin");
    nomad(&n1).arg("export").arg(&payload).assert().success();

    nomad(&n1).args(["set", "offheap", "512MB"]).assert().success();
    nomad(&n1)
        .arg("sync")
        .arg(&payload)
        .assert()
        .failure()
        .stderr(predicate::str::contains("ahead"));
}

#[test]
fn sync_rejects_garbage_payload() {
    let (temp, n1) = activated_project();
    let payload = temp.path().join("payload.bin");
    fs::write(&payload, b"not a payload").unwrap();

    nomad(&n1)
        .arg("sync")
        .arg(&payload)
        .assert()
        .failure()
        .stderr(predicate::str::contains("decode"));
}

#[test]
fn export_requires_activation() {
    let temp = TempDir::new().unwrap();
    init(temp.path(), "n1", 9410);
    nomad(temp.path())
        .arg("export")
        .arg(temp.path().join("payload.bin"))
        .assert()
        .failure();
}
