use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, content).expect("write");
}

#[test]
fn empty_run_with_no_modules_or_samples_succeeds() {
    let td = tempdir().expect("tempdir");
    let outdir = td.path().join("out");

    Command::cargo_bin("pipeweave")
        .expect("binary")
        .current_dir(td.path())
        .args(["--modules-dir", "nonexistent-modules", "--outdir"])
        .arg(&outdir)
        .assert()
        .success()
        .stderr(contains("execution complete"));
}

#[test]
fn invalid_config_file_value_reports_every_failing_leaf_and_exits_1() {
    let td = tempdir().expect("tempdir");
    let config_path = td.path().join("config.yaml");
    write_file(&config_path, "log_level: 123\n");

    Command::cargo_bin("pipeweave")
        .expect("binary")
        .current_dir(td.path())
        .args(["--config"])
        .arg(&config_path)
        .args(["--modules-dir", "nonexistent-modules"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("Invalid configuration"));
}

#[test]
fn samples_file_is_loaded_and_classified_failed_with_no_runners() {
    let td = tempdir().expect("tempdir");
    let samples_path = td.path().join("samples.yaml");
    write_file(&samples_path, "- id: s1\n  files: [a.txt]\n- id: s2\n  files: [b.txt]\n");

    Command::cargo_bin("pipeweave")
        .expect("binary")
        .current_dir(td.path())
        .args(["--samples-file"])
        .arg(&samples_path)
        .args(["--modules-dir", "nonexistent-modules"])
        .assert()
        .success()
        .stderr(contains("execution complete"));
}

#[test]
fn module_schema_secret_leaf_default_is_hidden_from_help() {
    let td = tempdir().expect("tempdir");
    let schema_path = td.path().join("schema.yaml");
    write_file(
        &schema_path,
        "api_token:\n  type: string\n  secret: true\n  default: \"super-secret-value\"\n",
    );

    Command::cargo_bin("pipeweave")
        .expect("binary")
        .current_dir(td.path())
        .args(["--schema"])
        .arg(&schema_path)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("super-secret-value").not());
}

#[test]
fn cycle_among_hooks_would_exit_1_is_not_reachable_without_extensions() {
    // No dynamically loadable extension is available in this workspace to
    // register a genuine hook cycle end-to-end; the resolver's cycle
    // detection itself is covered at the unit level in pipeweave-schedule.
    let td = tempdir().expect("tempdir");
    Command::cargo_bin("pipeweave")
        .expect("binary")
        .current_dir(td.path())
        .args(["--modules-dir", "nonexistent-modules"])
        .assert()
        .success();
}
