//! Spawning and supervising the external mount and sync processes.
//!
//! Output draining is a fixed low-frequency poll over non-blocking pipes
//! rather than blocking reads: two independently running processes' output
//! must interleave by arrival time, and a stalled process must never stall
//! log forwarding for its sibling.
use std::{
    io::{self, Read},
    os::fd::AsRawFd,
    process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio},
    thread,
    time::Duration,
};

use tracing::{debug, warn};

use crate::{error::BackupManagerError, logs::Journal};

/// Interval between drain rounds.
const DRAIN_ROUND: Duration = Duration::from_secs(1);

/// Buffers partial output of one non-blocking stream between drain rounds.
struct OutputStream<R> {
    reader: R,
    pending: Vec<u8>,
}

impl<R: Read> OutputStream<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::new(),
        }
    }

    /// Reads whatever is currently buffered, forwarding complete lines to
    /// the journal. Absence of data is not an error and never blocks.
    fn drain_into(&mut self, journal: &Journal) {
        let mut chunk = [0u8; 4096];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = self.pending.drain(..=pos).collect();
                        let text = String::from_utf8_lossy(&line[..pos]);
                        journal.log(text.trim_end());
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("Failed to read child output: {err}");
                    break;
                }
            }
        }
    }

    /// Forwards a trailing unterminated line once the process has exited.
    fn flush_into(&mut self, journal: &Journal) {
        if self.pending.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending).trim_end().to_string();
        self.pending.clear();
        if !text.is_empty() {
            journal.log(&text);
        }
    }
}

/// Handle to a spawned external process with non-blocking output streams.
///
/// The handle is owned exclusively by the component that spawned it until it
/// is registered with the active cycle; only the supervisor mutates it.
pub struct ChildProcess {
    role: String,
    child: Child,
    stdout: Option<OutputStream<ChildStdout>>,
    stderr: Option<OutputStream<ChildStderr>>,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Role label used in journal and error messages.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// OS process identifier.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Refreshes and returns the last-known exit status without blocking.
    pub fn poll(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.status = status,
                Err(err) => warn!("Failed to poll {}: {err}", self.role),
            }
        }
        self.status
    }

    /// Whether the process is known to have exited.
    pub fn has_exited(&mut self) -> bool {
        self.poll().is_some()
    }

    /// One drain round: refresh the exit status and forward any buffered
    /// output lines to the journal.
    pub fn drain_round(&mut self, journal: &Journal) {
        self.poll();
        if let Some(stream) = self.stdout.as_mut() {
            stream.drain_into(journal);
        }
        if let Some(stream) = self.stderr.as_mut() {
            stream.drain_into(journal);
        }
        if self.status.is_some() {
            if let Some(stream) = self.stdout.as_mut() {
                stream.flush_into(journal);
            }
            if let Some(stream) = self.stderr.as_mut() {
                stream.flush_into(journal);
            }
        }
    }

    /// Requests graceful termination and reaps the process.
    ///
    /// A process that has already exited is not an error; ESRCH from the
    /// kill is suppressed because it means the same thing.
    pub fn terminate(&mut self, journal: &Journal) {
        if self.poll().is_some() {
            return;
        }

        let pid = nix::unistd::Pid::from_raw(self.child.id() as i32);
        match nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(err) => warn!("Failed to signal {} (PID {pid}): {err}", self.role),
        }

        match self.child.wait() {
            Ok(status) => self.status = Some(status),
            Err(err) => warn!("Failed to wait on {}: {err}", self.role),
        }

        self.drain_round(journal);
    }

    /// Polls and drains until the process exits, returning its status.
    pub fn wait_drained(&mut self, journal: &Journal) -> Option<ExitStatus> {
        loop {
            self.drain_round(journal);
            if let Some(status) = self.status {
                return Some(status);
            }
            thread::sleep(DRAIN_ROUND);
        }
    }
}

/// Launches `program` with both output streams configured non-blocking.
pub fn spawn(
    role: &str,
    program: &str,
    args: &[String],
) -> Result<ChildProcess, BackupManagerError> {
    debug!("Spawning {role}: `{program} {}`", args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| BackupManagerError::SpawnError {
            process: role.to_string(),
            source,
        })?;

    let launch_error = |source: io::Error| BackupManagerError::SpawnError {
        process: role.to_string(),
        source,
    };

    let stdout = match child.stdout.take() {
        Some(pipe) => {
            set_nonblocking(pipe.as_raw_fd()).map_err(launch_error)?;
            Some(OutputStream::new(pipe))
        }
        None => None,
    };
    let stderr = match child.stderr.take() {
        Some(pipe) => {
            set_nonblocking(pipe.as_raw_fd()).map_err(launch_error)?;
            Some(OutputStream::new(pipe))
        }
        None => None,
    };

    Ok(ChildProcess {
        role: role.to_string(),
        child,
        stdout,
        stderr,
        status: None,
    })
}

/// Drains output from every handle for `timeout_secs` one-second rounds.
///
/// Every round refreshes each handle's exit status and forwards whatever
/// output is currently available; a handle with nothing to say costs
/// nothing and never delays its siblings.
pub fn drain(children: &mut [&mut ChildProcess], journal: &Journal, timeout_secs: u64) {
    for _ in 0..timeout_secs {
        for child in children.iter_mut() {
            child.drain_round(journal);
        }
        thread::sleep(DRAIN_ROUND);
    }
}

/// Switches a pipe fd to non-blocking reads.
fn set_nonblocking(fd: std::os::fd::RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
