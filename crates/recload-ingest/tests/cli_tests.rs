//! Command-line tests for the recload-ingest binary

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod common;

fn recload() -> Command {
    let mut cmd = Command::cargo_bin("recload-ingest").unwrap();
    cmd.env_remove("RECLOAD_CONFIG")
        .env_remove("LOG_LEVEL")
        .env_remove("LOG_OUTPUT");
    cmd
}

#[test]
fn test_dry_run_reports_totals() {
    let data = common::registry_tree();
    let settings = TempDir::new().unwrap();
    let config = common::write_config(
        settings.path(),
        &common::config_yaml(&[("registry", data.path(), "GenericModel")], 2, "postgres"),
    );

    recload()
        .arg("run")
        .arg("--config")
        .arg(&config)
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(predicate::str::contains("datasources: 2 processed, 0 failed"))
        .stdout(predicate::str::contains("3 accepted"))
        .stdout(predicate::str::contains("datastore: 3 written"));
}

#[test]
fn test_config_from_environment() {
    let data = common::registry_tree();
    let settings = TempDir::new().unwrap();
    let config = common::write_config(
        settings.path(),
        &common::config_yaml(&[("registry", data.path(), "GenericModel")], 1, "postgres"),
    );

    recload()
        .env("RECLOAD_CONFIG", &config)
        .args(["run", "--dry-run", "--process", "registry"])
        .assert()
        .success()
        .stdout(predicate::str::contains("datasources: 2 processed"));
}

#[test]
fn test_discover_lists_datasources() {
    let data = common::registry_tree();
    let settings = TempDir::new().unwrap();
    let config = common::write_config(
        settings.path(),
        &common::config_yaml(&[("registry", data.path(), "GenericModel")], 2, "postgres"),
    );

    recload()
        .arg("discover")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("registry: 2 datasource(s)"))
        .stdout(predicate::str::contains("a.json"))
        .stdout(predicate::str::contains("b.zip!c.json"));
}

#[test]
fn test_failed_process_exits_with_error() {
    let missing = TempDir::new().unwrap();
    let settings = TempDir::new().unwrap();
    let config = common::write_config(
        settings.path(),
        &common::config_yaml(
            &[("broken", missing.path().join("absent").as_path(), "GenericModel")],
            1,
            "postgres",
        ),
    );

    recload()
        .args(["run", "--dry-run", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("process definition(s) failed"));
}

#[test]
fn test_missing_config_file() {
    recload()
        .args(["run", "--config", "/nonexistent/settings.yml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
