//! Outer scheduling loop, single-instance guard and daemonization.
use std::{
    fs,
    io::{self, Write},
    os::unix::io::IntoRawFd,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use fs2::FileExt;
use nix::{sys::signal, unistd::Pid};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    cycle::{ActiveCycle, BackupCycle},
    error::{BackupManagerError, PidFileError},
    logs::Journal,
    mount::MountPoint,
};

/// Long-lived daemon that sweeps every configured target once per pass and
/// sleeps a fixed interval between passes.
pub struct BackupDaemon {
    config: Config,
    journal: Arc<Journal>,
    mount: MountPoint,
    active: Arc<Mutex<ActiveCycle>>,
}

impl BackupDaemon {
    /// Builds the daemon for a loaded configuration.
    pub fn new(config: Config, journal: Arc<Journal>) -> Self {
        let mount =
            MountPoint::for_daemon(&config.mount_binary, Path::new(&config.backup_dir));
        Self {
            config,
            journal,
            mount,
            active: Arc::new(Mutex::new(ActiveCycle::default())),
        }
    }

    /// The shared active-cycle reference, for the signal controller.
    pub fn active(&self) -> &Arc<Mutex<ActiveCycle>> {
        &self.active
    }

    /// The mount point controller, for the signal controller.
    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    /// Runs one full pass over the configured targets.
    ///
    /// Per-target failures are journaled and contained; the pass continues
    /// with the next target.
    pub fn run_once(&self) {
        self.journal.log("Backup started");

        for target in &self.config.backups {
            let cycle =
                BackupCycle::new(&self.config, &self.journal, &self.mount, &self.active);
            if let Err(err) = cycle.run(target) {
                self.journal
                    .log(&format!("Backup of \"{}\" failed: {err}", target.volume));
            }
        }

        self.journal.log("Backup finished");
    }

    /// Runs passes forever with the configured sleep between them.
    pub fn run(&self) -> ! {
        loop {
            self.run_once();
            let interval = Duration::from_secs(self.config.interval_hours * 3600);
            debug!("Sleeping {:?} until the next pass", interval);
            thread::sleep(interval);
        }
    }
}

/// Single-instance guard: an exclusively locked PID file.
///
/// The lock is held for the process lifetime; a second instance fails to
/// acquire it and refuses to start.
pub struct PidFile {
    _file: fs::File,
    path: PathBuf,
}

impl PidFile {
    /// Default location under the user's data directory.
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/".to_string());
        PathBuf::from(format!("{home}/.local/share/backupg/backupg.pid"))
    }

    /// Creates and exclusively locks the PID file, recording our PID.
    pub fn acquire(path: PathBuf) -> Result<Self, PidFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(err) = file.try_lock_exclusive() {
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(match Self::read(&path) {
                    Ok(pid) => PidFileError::AlreadyRunning(pid),
                    Err(_) => PidFileError::ParseError,
                });
            }
            return Err(err.into());
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    /// The path this guard locked.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the PID recorded by a running instance.
    pub fn read(path: &Path) -> Result<u32, PidFileError> {
        let contents = fs::read_to_string(path)?;
        contents
            .trim()
            .parse()
            .map_err(|_| PidFileError::ParseError)
    }
}

/// Signals the running instance named by the PID file, cleaning up a stale
/// file when the process is already gone.
pub fn stop_running_instance(path: &Path) -> Result<(), BackupManagerError> {
    let pid = PidFile::read(path)?;
    let target = Pid::from_raw(pid as i32);

    match signal::kill(target, signal::Signal::SIGTERM) {
        Ok(()) => {
            info!("Sent SIGTERM to backupg instance {pid}");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            warn!("PID file names PID {pid} but no such process; removing stale file");
            let _ = fs::remove_file(path);
            Err(PidFileError::NotRunning.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// Detaches the process into the background.
pub fn daemonize() -> io::Result<()> {
    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setsid();
    }

    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    unsafe {
        libc::setpgid(0, 0);
    }

    std::env::set_current_dir("/")?;
    let devnull = std::fs::File::open("/dev/null")?;
    let fd = devnull.into_raw_fd();
    unsafe {
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }

    Ok(())
}
