//! Smoke tests for the pgkeeper binary: argument parsing, exit codes and the
//! operations that never need a running backend.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;

fn cli_bin() -> Command {
    Command::cargo_bin("pgkeeper").expect("binary should build")
}

#[test]
fn prints_help() {
    let mut cmd = cli_bin();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(
            predicate::str::contains("--backup-type")
                .and(predicate::str::contains("--restore"))
                .and(predicate::str::contains("--apply-retention"))
                .and(predicate::str::contains("--rollback-to")),
        );
}

#[test]
fn rejects_unknown_flags() {
    let mut cmd = cli_bin();
    cmd.arg("--not-a-real-flag");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn rejects_conflicting_backend_overrides() {
    let mut cmd = cli_bin();
    cmd.args(["--force-docker", "--force-kubernetes"]);
    cmd.assert().failure();
}

#[test]
fn invalid_backup_name_exits_3_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--name", ".hidden"]);
    cmd.assert().code(3);

    let sql_files: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("sql"))
        .collect();
    assert!(sql_files.is_empty());
}

#[test]
fn reserved_backup_name_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--name", "CON"]);
    cmd.assert().code(3);
}

#[test]
fn malformed_labels_exit_1() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--labels", "nodelimiter"]);
    cmd.assert().code(1);
}

#[test]
fn list_on_empty_directory_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--list"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No backup files"));
}

#[test]
fn retention_dry_run_on_empty_directory_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--retention-dry-run"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No backups exceed"));
}

#[test]
fn backup_summary_on_empty_directory_recommends_full() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--backup-summary"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("full"));
}

#[test]
fn list_versions_on_empty_directory_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--list-versions"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No versions"));
}

#[test]
fn version_info_for_unknown_version_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args([
        "--dir",
        dir.path().to_str().unwrap(),
        "--version-info",
        "9.9.9-main.20250101_000000",
    ]);
    cmd.assert().code(3);
}

#[test]
fn rollback_to_unknown_version_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args([
        "--dir",
        dir.path().to_str().unwrap(),
        "--rollback-to",
        "9.9.9-main.20250101_000000",
    ]);
    cmd.assert().code(3);
}

#[test]
fn compare_versions_with_garbage_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args([
        "--dir",
        dir.path().to_str().unwrap(),
        "--compare-versions",
        "not-a-version",
        "also-not",
    ]);
    cmd.assert().code(1);
}

#[test]
fn restore_file_that_does_not_exist_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args([
        "--dir",
        dir.path().to_str().unwrap(),
        "--restore-file",
        "/nonexistent/backup.sql",
    ]);
    cmd.assert().code(3);
}

#[test]
fn interactive_restore_cancel_exits_4() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("seed.sql"),
        "-- PostgreSQL database dump\nCREATE TABLE t ();\n",
    )
    .unwrap();

    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--restore"]);
    cmd.write_stdin("0\n");
    cmd.assert().code(4);
}

#[test]
fn interactive_restore_with_no_backups_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cli_bin();
    cmd.args(["--dir", dir.path().to_str().unwrap(), "--restore"]);
    cmd.write_stdin("");
    cmd.assert().code(3);
}
