#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use assert_cmd::cargo::cargo_bin;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn help_lists_the_subcommands() {
    assert_cmd::Command::new(cargo_bin("bkg"))
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("start")
                .and(predicate::str::contains("stop"))
                .and(predicate::str::contains("logs")),
        );
}

#[test]
fn start_fails_on_a_missing_config_file() {
    let dir = tempdir().unwrap();
    assert_cmd::Command::new(cargo_bin("bkg"))
        .args([
            "start",
            "--config",
            "/nonexistent/backupg-test.yaml",
            "--once",
            "--pid-file",
        ])
        .arg(dir.path().join("bkg.pid"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nonexistent/backupg-test.yaml"));
}

#[test]
fn logs_prints_the_journal_tail() {
    let dir = tempdir().unwrap();
    let log_file = dir.path().join("backup.log");
    fs::write(&log_file, "2026-01-01 00:00:00 | older\n2026-01-01 00:00:01 | newest\n")
        .unwrap();

    let config = format!(
        r#"
version: "1"
log_file: {log}
mount_binary: /usr/sbin/cloudfs
mount_config: /etc/cloudfs.conf
backup_dir: /mnt/backup
interval_hours: 1
backups:
  - volume: v1
    path: /a
"#,
        log = log_file.display()
    );
    let config_path = dir.path().join("backupg.yaml");
    fs::write(&config_path, config).unwrap();

    assert_cmd::Command::new(cargo_bin("bkg"))
        .args(["logs", "--lines", "1", "--config"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("newest").and(predicate::str::contains("older").not()),
        );
}

#[test]
fn stop_cleans_up_a_stale_pid_file() {
    let dir = tempdir().unwrap();
    let pid_file = dir.path().join("bkg.pid");
    fs::write(&pid_file, "999999\n").unwrap();

    assert_cmd::Command::new(cargo_bin("bkg"))
        .args(["stop", "--pid-file"])
        .arg(&pid_file)
        .assert()
        .failure();

    assert!(!pid_file.exists(), "stale PID file was not removed");
}

#[test]
fn sigterm_during_a_cycle_exits_cleanly() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("src")).unwrap();

    // Volume creation is instant; the mount daemon lingers without ever
    // mounting, parking the cycle in its wait-for-mount loop.
    let mount_binary = common::write_script(
        root,
        "fake-cloudfs",
        r#"case "$*" in
  *--create*) exit 0 ;;
  *) sleep 5 ;;
esac"#,
    );
    let sync_binary = common::write_script(root, "fake-rsync", "exit 0");

    let config = format!(
        r#"
version: "1"
log_file: {root}/backup.log
mount_binary: {mount}
mount_config: {root}/cloudfs.conf
backup_dir: {root}/mnt
interval_hours: 1
sync_binary: {sync}
backups:
  - volume: v1
    path: {root}/src
"#,
        root = root.display(),
        mount = mount_binary.display(),
        sync = sync_binary.display(),
    );
    let config_path = root.join("backupg.yaml");
    fs::write(&config_path, config).unwrap();

    let mut child = Command::new(cargo_bin("bkg"))
        .arg("start")
        .arg("--once")
        .arg("--config")
        .arg(&config_path)
        .arg("--pid-file")
        .arg(root.join("bkg.pid"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Wait until the cycle is parked waiting for the mount, then signal.
    common::wait_for_content(
        &root.join("backup.log"),
        "to mount",
        Duration::from_secs(15),
    );
    let kill = Command::new("kill")
        .arg(child.id().to_string())
        .status()
        .unwrap();
    assert!(kill.success());

    let deadline = Instant::now() + Duration::from_secs(15);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            panic!("bkg did not exit after SIGTERM");
        }
        thread::sleep(Duration::from_millis(100));
    };

    assert!(status.success(), "expected a clean exit, got {status}");
    let journal = fs::read_to_string(root.join("backup.log")).unwrap();
    assert!(journal.contains("Caught signal 15, exiting"));
}
