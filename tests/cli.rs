//! Command-line tests against a throwaway keepsake directory

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Settings with cheap key derivation so each invocation stays fast
const FAST_SETTINGS: &str = r#"{
  "schema_version": 1,
  "key_params": {"salt": "c2FsdHNhbHRzYWx0", "memory_cost": 256, "time_cost": 1, "parallelism": 1}
}"#;

fn keepsake(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("keepsake").unwrap();
    cmd.env("KEEPSAKE_DATA_DIR", home).env_remove("RUST_LOG");
    cmd
}

fn initialized_home() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.json"), FAST_SETTINGS).unwrap();
    keepsake(temp.path()).arg("init").assert().success();
    fs::write(temp.path().join("data").join("notes.json"), r#"{"note": "hello"}"#).unwrap();
    fs::write(temp.path().join("media").join("cover.png"), vec![1u8; 2048]).unwrap();
    temp
}

#[test]
fn config_reports_uninitialized_home() {
    let temp = TempDir::new().unwrap();
    keepsake(temp.path())
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Keepsake Configuration"))
        .stdout(predicate::str::contains("Not initialized yet"));
}

#[test]
fn init_creates_layout_and_device_key() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("config.json"), FAST_SETTINGS).unwrap();
    keepsake(temp.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialization complete!"));

    assert!(temp.path().join("data").is_dir());
    assert!(temp.path().join("media").is_dir());
    assert!(temp.path().join("backups").is_dir());
    assert!(temp.path().join("device.key").is_file());
}

#[test]
fn list_without_backups() {
    let home = initialized_home();
    keepsake(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found."));
}

#[test]
fn create_upload_and_list() {
    let home = initialized_home();
    keepsake(home.path())
        .args(["create", "--media", "--upload"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup created: bkp-"))
        .stdout(predicate::str::contains("local+remote"));

    keepsake(home.path())
        .args(["list", "--verbose"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 1 backup(s)"))
        .stdout(predicate::str::contains("[media]"));

    let remote_blobs = fs::read_dir(home.path().join("remote")).unwrap().count();
    assert_eq!(remote_blobs, 1);
}

#[test]
fn restore_requires_force() {
    let home = initialized_home();
    keepsake(home.path()).arg("create").assert().success();
    let notes = home.path().join("data").join("notes.json");
    fs::write(&notes, "edited").unwrap();

    keepsake(home.path())
        .args(["restore", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
    assert_eq!(fs::read_to_string(&notes).unwrap(), "edited");

    keepsake(home.path())
        .args(["restore", "latest", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Restore complete!"));
    assert_eq!(fs::read_to_string(&notes).unwrap(), r#"{"note": "hello"}"#);
}

#[test]
fn verify_and_delete_latest() {
    let home = initialized_home();
    keepsake(home.path()).arg("create").assert().success();

    keepsake(home.path())
        .args(["verify", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is intact"));

    keepsake(home.path())
        .args(["delete", "latest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted backup"));

    keepsake(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No backups found."));
}

#[test]
fn unknown_backup_is_an_error() {
    let home = initialized_home();
    keepsake(home.path())
        .args(["info", "bkp-deadbeef"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Backup not found"));
}

#[test]
fn prune_previews_then_deletes() {
    let home = initialized_home();
    for _ in 0..3 {
        keepsake(home.path()).arg("create").assert().success();
    }

    keepsake(home.path())
        .args(["prune", "--keep", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("To be deleted: 2"));

    keepsake(home.path())
        .args(["prune", "--keep", "1", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted 2 backup(s)."));

    keepsake(home.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Total: 1 backup(s)"));
}

#[test]
fn history_shows_audit_trail() {
    let home = initialized_home();
    keepsake(home.path()).arg("create").assert().success();

    keepsake(home.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("CREATED"));
}
