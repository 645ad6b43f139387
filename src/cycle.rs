//! Per-target backup cycle orchestration.
//!
//! One cycle sequences volume creation, stale unmount, mount, sync and the
//! final unmount for a single target. Failures are contained to the target:
//! the outer loop continues with the next one, and a failed target is only
//! retried on the next full pass.
use std::{
    fs,
    process::ExitStatus,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use strum_macros::AsRefStr;
use tracing::debug;

use crate::{
    config::{BackupTarget, Config},
    error::BackupManagerError,
    logs::Journal,
    mount::MountPoint,
    supervisor::{self, ChildProcess},
};

/// Interval between wait-for-mount and sync drain rounds.
const POLL_ROUND: Duration = Duration::from_secs(1);

/// Role label of the mount daemon process.
const MOUNT_DAEMON: &str = "mount daemon";

/// Role label of the sync tool process.
const SYNC_TOOL: &str = "sync tool";

/// Phases of one backup cycle.
///
/// Transitions are strictly forward; the only backward edge is the
/// universal cancel into a terminal state, driven by the signal controller
/// tearing the whole process down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CycleState {
    Idle,
    CreatingVolume,
    UnmountingStale,
    Mounting,
    WaitMount,
    Syncing,
    UnmountingFinal,
    Done,
    Failed,
}

/// The running cycle's pair of child-process handles, shared between the
/// state machine and the signal controller.
///
/// At most one cycle populates this at any time; it is cleared only after
/// both processes have fully exited.
#[derive(Default)]
pub struct ActiveCycle {
    /// The mount daemon, once spawned.
    pub mounter: Option<ChildProcess>,
    /// The sync tool, once spawned.
    pub syncer: Option<ChildProcess>,
}

/// How the sync phase ended.
enum SyncOutcome {
    /// The sync tool exited on its own with this status.
    Finished(ExitStatus),
    /// The mount daemon died while the sync tool was still running.
    DaemonDied,
}

/// Drives one backup target through a full cycle.
pub struct BackupCycle<'a> {
    config: &'a Config,
    journal: &'a Journal,
    mount: &'a MountPoint,
    active: &'a Arc<Mutex<ActiveCycle>>,
    state: CycleState,
}

impl<'a> BackupCycle<'a> {
    /// Creates a fresh cycle; each target gets its own.
    pub fn new(
        config: &'a Config,
        journal: &'a Journal,
        mount: &'a MountPoint,
        active: &'a Arc<Mutex<ActiveCycle>>,
    ) -> Self {
        Self {
            config,
            journal,
            mount,
            active,
            state: CycleState::Idle,
        }
    }

    fn enter(&mut self, next: CycleState) {
        debug!("cycle state {} -> {}", self.state.as_ref(), next.as_ref());
        self.state = next;
    }

    /// Runs the cycle for `target`, returning `Err` when it ends failed.
    pub fn run(mut self, target: &BackupTarget) -> Result<(), BackupManagerError> {
        if target.disabled {
            self.journal
                .log(&format!("Skipping disabled volume \"{}\"", target.volume));
            self.enter(CycleState::Done);
            return Ok(());
        }

        self.journal
            .log(&format!("Backing up \"{}\" ...", target.volume));

        self.enter(CycleState::CreatingVolume);
        if let Err(err) = fs::create_dir_all(self.mount.dir()) {
            debug!(
                "Failed to create backup directory {}: {err}",
                self.mount.dir().display()
            );
        }
        self.create_volume(target);

        self.enter(CycleState::UnmountingStale);
        self.mount.unmount();
        self.mount.wait_unmounted(self.journal);

        self.enter(CycleState::Mounting);
        if let Err(err) = validate_target(target) {
            self.journal
                .log(&format!("Invalid configuration for volume \"{}\"", target.volume));
            self.enter(CycleState::Failed);
            return Err(err);
        }

        let mounter = match supervisor::spawn(
            MOUNT_DAEMON,
            &self.config.mount_binary,
            &mount_args(self.config, target),
        ) {
            Ok(child) => child,
            Err(err) => {
                self.journal.log(&format!("Error mounting volume: {err}"));
                self.enter(CycleState::Failed);
                return Err(err);
            }
        };
        self.active.lock()?.mounter = Some(mounter);

        self.enter(CycleState::WaitMount);
        if !self.wait_for_mount()? {
            self.journal
                .log("Error mounting volume, mount daemon unexpectedly terminated");
            self.clear_active()?;
            self.enter(CycleState::Failed);
            return Err(BackupManagerError::PrematureExit {
                process: MOUNT_DAEMON.to_string(),
            });
        }

        self.enter(CycleState::Syncing);
        let sync_binary = target
            .sync_binary
            .as_deref()
            .unwrap_or(&self.config.sync_binary);
        let syncer = match supervisor::spawn(
            SYNC_TOOL,
            sync_binary,
            &sync_args(target, &self.config.backup_dir),
        ) {
            Ok(child) => child,
            Err(err) => {
                self.journal.log(&format!("Error starting sync: {err}"));
                self.finish_unmount()?;
                self.enter(CycleState::Failed);
                return Err(err);
            }
        };
        self.active.lock()?.syncer = Some(syncer);

        match self.drain_until_sync_exit()? {
            SyncOutcome::Finished(status) => {
                if !status.success() {
                    self.journal
                        .log(&format!("Sync tool exited with {status}"));
                }
            }
            SyncOutcome::DaemonDied => {
                self.journal
                    .log("Error, mount daemon unexpectedly terminated");
                self.finish_unmount()?;
                self.enter(CycleState::Failed);
                return Err(BackupManagerError::PrematureExit {
                    process: MOUNT_DAEMON.to_string(),
                });
            }
        }

        self.finish_unmount()?;
        self.enter(CycleState::Done);
        self.journal
            .log(&format!("Finished backing up \"{}\"", target.volume));
        Ok(())
    }

    /// Best-effort volume creation; an already-existing volume is the
    /// common case, so the exit status is ignored.
    fn create_volume(&self, target: &BackupTarget) {
        let args = vec![
            "--config".to_string(),
            self.config.mount_config.clone(),
            "--create".to_string(),
            "--volume".to_string(),
            target.volume.clone(),
        ];

        match supervisor::spawn("volume create", &self.config.mount_binary, &args) {
            Ok(mut child) => {
                child.wait_drained(self.journal);
            }
            Err(err) => {
                self.journal.log(&format!(
                    "Failed to run volume create for \"{}\": {err}",
                    target.volume
                ));
            }
        }
    }

    /// Polls the mount daemon's output and the mount table until the backup
    /// directory is mounted. Returns `false` when the daemon exits first.
    ///
    /// Unbounded; graceful shutdown is the only bound.
    fn wait_for_mount(&self) -> Result<bool, BackupManagerError> {
        loop {
            {
                let mut active = self.active.lock()?;
                match active.mounter.as_mut() {
                    Some(mounter) => {
                        mounter.drain_round(self.journal);
                        if mounter.has_exited() {
                            return Ok(false);
                        }
                    }
                    // Shutdown in progress: the signal controller took the
                    // handle and will exit the process.
                    None => {}
                }
            }

            if self.mount.is_mounted() {
                return Ok(true);
            }

            self.journal
                .log(&format!("Waiting for {} to mount", self.mount.dir().display()));
            thread::sleep(POLL_ROUND);
        }
    }

    /// Drains both handles each round until the sync tool exits or the
    /// mount daemon dies under it.
    fn drain_until_sync_exit(&self) -> Result<SyncOutcome, BackupManagerError> {
        loop {
            {
                let mut active = self.active.lock()?;
                let ActiveCycle { mounter, syncer } = &mut *active;
                if let (Some(mounter), Some(syncer)) = (mounter.as_mut(), syncer.as_mut())
                {
                    mounter.drain_round(self.journal);
                    syncer.drain_round(self.journal);

                    if let Some(status) = syncer.poll() {
                        return Ok(SyncOutcome::Finished(status));
                    }
                    if mounter.has_exited() {
                        syncer.terminate(self.journal);
                        return Ok(SyncOutcome::DaemonDied);
                    }
                }
                // Otherwise shutdown is in progress; keep ticking until the
                // signal controller exits the process.
            }
            thread::sleep(POLL_ROUND);
        }
    }

    /// Final cleanup: unmount, wait for the mount daemon to exit, then
    /// release the active-cycle handles.
    fn finish_unmount(&mut self) -> Result<(), BackupManagerError> {
        self.enter(CycleState::UnmountingFinal);
        self.mount.unmount();

        loop {
            {
                let mut active = self.active.lock()?;
                let exited = match active.mounter.as_mut() {
                    Some(mounter) => {
                        mounter.drain_round(self.journal);
                        mounter.has_exited()
                    }
                    // Shutdown in progress: the signal controller owns the
                    // teardown now.
                    None => true,
                };
                if exited {
                    active.mounter = None;
                    active.syncer = None;
                    return Ok(());
                }
            }
            thread::sleep(POLL_ROUND);
        }
    }

    /// Releases the active-cycle handles after both processes have exited.
    fn clear_active(&self) -> Result<(), BackupManagerError> {
        let mut active = self.active.lock()?;
        active.mounter = None;
        active.syncer = None;
        Ok(())
    }
}

/// Arguments for mounting the target volume on the shared backup dir.
fn mount_args(config: &Config, target: &BackupTarget) -> Vec<String> {
    vec![
        "--config".to_string(),
        config.mount_config.clone(),
        "--force".to_string(),
        "--nofork".to_string(),
        "--volume".to_string(),
        target.volume.clone(),
        "--mount".to_string(),
        config.backup_dir.clone(),
    ]
}

/// Composes the sync tool's argument list for one target: delete, in-place
/// and archive semantics always on, then the per-target options, sources
/// and the mount point as destination.
pub fn sync_args(target: &BackupTarget, backup_dir: &str) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--delete".to_string(),
        "--inplace".to_string(),
        "-avp".to_string(),
    ];

    if target.one_file_system {
        args.push("--one-file-system".to_string());
    }

    if let Some(excludes) = &target.exclude {
        for pattern in excludes.iter() {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
    }

    if let Some(extra) = &target.extra_sync_flags {
        args.extend(extra.iter().cloned());
    }

    args.extend(target.path.iter().cloned());
    args.push(backup_dir.to_string());
    args
}

/// Checks the parts of a target serde's shape validation cannot see.
fn validate_target(target: &BackupTarget) -> Result<(), BackupManagerError> {
    if target.path.is_empty() {
        return Err(BackupManagerError::InvalidTarget {
            volume: target.volume.clone(),
            reason: "no source paths".to_string(),
        });
    }

    if let Some(excludes) = &target.exclude
        && excludes.iter().any(|pattern| pattern.is_empty())
    {
        return Err(BackupManagerError::InvalidTarget {
            volume: target.volume.clone(),
            reason: "empty exclude pattern".to_string(),
        });
    }

    Ok(())
}
