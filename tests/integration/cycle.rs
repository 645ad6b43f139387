#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    path::Path,
    sync::{Arc, Mutex},
};

use backupg::{
    config::{Config, load_config},
    cycle::{ActiveCycle, BackupCycle},
    daemon::BackupDaemon,
    error::BackupManagerError,
    logs::Journal,
    mount::MountPoint,
};
use tempfile::{TempDir, tempdir};

/// Writes a config file pointing at the given fake binaries and one target.
fn write_config(
    dir: &TempDir,
    mount_binary: &Path,
    sync_binary: &Path,
    target_yaml: &str,
) -> String {
    let root = dir.path();
    fs::create_dir_all(root.join("src")).unwrap();
    let yaml = format!(
        r#"
version: "1"
log_file: {root}/backup.log
mount_binary: {mount}
mount_config: {root}/cloudfs.conf
backup_dir: {root}/mnt
interval_hours: 1
sync_binary: {sync}
backups:
{target_yaml}
"#,
        root = root.display(),
        mount = mount_binary.display(),
        sync = sync_binary.display(),
    );

    let path = root.join("backupg.yaml");
    fs::write(&path, yaml).unwrap();
    path.to_str().unwrap().to_string()
}

fn run_cycle(config: &Config) -> Result<(), BackupManagerError> {
    let journal = Journal::open(config.log_file.as_ref()).unwrap();
    let mount = MountPoint::for_daemon(&config.mount_binary, Path::new(&config.backup_dir));
    let active = Arc::new(Mutex::new(ActiveCycle::default()));

    let cycle = BackupCycle::new(config, &journal, &mount, &active);
    let result = cycle.run(&config.backups[0]);

    // Whatever happened, the cycle must have released its handles.
    let guard = active.lock().unwrap();
    assert!(guard.mounter.is_none());
    assert!(guard.syncer.is_none());

    result
}

#[test]
fn disabled_target_spawns_nothing() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("cloudfs-ran");
    let mount_binary = common::write_script(
        dir.path(),
        "fake-cloudfs",
        &format!("touch {}", marker.display()),
    );
    let sync_binary = common::write_script(dir.path(), "fake-rsync", "exit 0");

    let config_path = write_config(
        &dir,
        &mount_binary,
        &sync_binary,
        &format!(
            "  - volume: v1\n    path: {}/src\n    disabled: true\n",
            dir.path().display()
        ),
    );
    let config = load_config(&config_path).unwrap();

    run_cycle(&config).unwrap();

    assert!(!marker.exists(), "disabled target spawned the mount binary");
    let journal = fs::read_to_string(dir.path().join("backup.log")).unwrap();
    assert!(journal.contains("Skipping disabled volume \"v1\""));
}

#[test]
fn premature_mount_daemon_exit_fails_the_cycle_without_spawning_sync() {
    let dir = tempdir().unwrap();
    let sync_marker = dir.path().join("rsync-ran");

    // Volume creation succeeds; mounting fails immediately.
    let mount_binary = common::write_script(
        dir.path(),
        "fake-cloudfs",
        r#"case "$*" in
  *--create*) exit 0 ;;
  *) echo "mount refused" >&2; exit 1 ;;
esac"#,
    );
    let sync_binary = common::write_script(
        dir.path(),
        "fake-rsync",
        &format!("touch {}", sync_marker.display()),
    );

    let config_path = write_config(
        &dir,
        &mount_binary,
        &sync_binary,
        &format!(
            "  - volume: v1\n    path: {}/src\n",
            dir.path().display()
        ),
    );
    let config = load_config(&config_path).unwrap();

    let err = run_cycle(&config).unwrap_err();
    assert!(matches!(err, BackupManagerError::PrematureExit { .. }));

    assert!(!sync_marker.exists(), "sync tool ran after a failed mount");
    let journal = fs::read_to_string(dir.path().join("backup.log")).unwrap();
    assert!(journal.contains("mount daemon unexpectedly terminated"));
    assert!(journal.contains("mount refused"));
}

#[test]
fn missing_mount_binary_is_a_spawn_error() {
    let dir = tempdir().unwrap();
    let sync_binary = common::write_script(dir.path(), "fake-rsync", "exit 0");

    let config_path = write_config(
        &dir,
        Path::new("/nonexistent/backupg-test-cloudfs"),
        &sync_binary,
        &format!(
            "  - volume: v1\n    path: {}/src\n",
            dir.path().display()
        ),
    );
    let config = load_config(&config_path).unwrap();

    let err = run_cycle(&config).unwrap_err();
    assert!(matches!(err, BackupManagerError::SpawnError { .. }));
}

#[test]
fn pass_contains_failures_and_continues_with_the_next_target() {
    let dir = tempdir().unwrap();
    let mount_binary = common::write_script(
        dir.path(),
        "fake-cloudfs",
        r#"case "$*" in
  *--create*) exit 0 ;;
  *) exit 1 ;;
esac"#,
    );
    let sync_binary = common::write_script(dir.path(), "fake-rsync", "exit 0");

    let config_path = write_config(
        &dir,
        &mount_binary,
        &sync_binary,
        &format!(
            "  - volume: broken\n    path: {root}/src\n  - volume: skipped\n    path: {root}/src\n    disabled: true\n",
            root = dir.path().display()
        ),
    );
    let config = load_config(&config_path).unwrap();

    let journal = Arc::new(Journal::open(config.log_file.as_ref()).unwrap());
    let daemon = BackupDaemon::new(config, Arc::clone(&journal));
    daemon.run_once();

    let journal = fs::read_to_string(dir.path().join("backup.log")).unwrap();
    assert!(journal.contains("Backup started"));
    assert!(journal.contains("Backup of \"broken\" failed"));
    assert!(journal.contains("Skipping disabled volume \"skipped\""));
    assert!(journal.contains("Backup finished"));
}
