//! Mount-state queries and unmount requests for the backup mount point.
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};
use tracing::debug;

use crate::logs::Journal;

/// Seconds between unmount retries while a stale mount drains.
const UNMOUNT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Controller for the shared backup mount point.
///
/// Callers must observe `is_mounted() == false` before attempting a new
/// mount; a prior unreleased mount would otherwise overlay the new one.
#[derive(Debug, Clone)]
pub struct MountPoint {
    fsname: String,
    fstype: String,
    dir: PathBuf,
}

impl MountPoint {
    /// Builds a controller for a FUSE filesystem named `fsname`.
    pub fn new(fsname: &str, dir: &Path) -> Self {
        Self {
            fsname: fsname.to_string(),
            fstype: format!("fuse.{fsname}"),
            dir: dir.to_path_buf(),
        }
    }

    /// Derives the filesystem name from the mount daemon binary path.
    pub fn for_daemon(mount_binary: &str, dir: &Path) -> Self {
        let fsname = Path::new(mount_binary)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("fuse");
        Self::new(fsname, dir)
    }

    /// The mount directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Issues an idempotent unmount request against the mount point.
    ///
    /// "Not currently mounted" is not an error; every failure mode is
    /// demoted to a debug line.
    pub fn unmount(&self) {
        let result = Command::new("fusermount")
            .arg("-u")
            .arg(&self.dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) if !status.success() => {
                debug!("fusermount -u {} exited with {status}", self.dir.display());
            }
            Ok(_) => {}
            Err(err) => {
                debug!("Failed to run fusermount for {}: {err}", self.dir.display());
            }
        }
    }

    /// Checks the OS mount table for the backup mount point. Pure query.
    pub fn is_mounted(&self) -> bool {
        let output = match Command::new("mount").output() {
            Ok(output) => output,
            Err(err) => {
                debug!("Failed to query mount table: {err}");
                return false;
            }
        };

        let table = String::from_utf8_lossy(&output.stdout);
        table_contains(&table, &self.table_line())
    }

    /// The exact mount table line announcing this mount.
    fn table_line(&self) -> String {
        format!("{} on {} type {}", self.fsname, self.dir.display(), self.fstype)
    }

    /// Retries `unmount` until the mount table no longer lists the backup
    /// directory, logging a wait line each round.
    ///
    /// Unbounded; graceful shutdown is the only bound.
    pub fn wait_unmounted(&self, journal: &Journal) {
        loop {
            self.unmount();
            if !self.is_mounted() {
                return;
            }
            journal.log(&format!("Waiting for {} to unmount", self.dir.display()));
            thread::sleep(UNMOUNT_POLL_INTERVAL);
        }
    }
}

/// Whether `table` holds a line announcing exactly `line` (the table line
/// continues with the mount options, so a prefix match on a full line is an
/// exact match on fsname, mount point and type).
fn table_contains(table: &str, line: &str) -> bool {
    table
        .lines()
        .any(|entry| entry == line || entry.starts_with(&format!("{line} ")))
}
