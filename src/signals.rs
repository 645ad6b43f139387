//! Signal-driven graceful shutdown.
//!
//! SIGHUP, SIGTERM and SIGQUIT all end the daemon the same way: the sync
//! tool is terminated, the backup dir is unmounted, the mount daemon is
//! waited out, and the process exits with a success status.
use std::{
    process,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use nix::sys::signal::{SigSet, Signal};
use tracing::error;

use crate::{cycle::ActiveCycle, logs::Journal, mount::MountPoint};

/// Signals that trigger a graceful shutdown.
const SHUTDOWN_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGTERM, Signal::SIGQUIT];

/// Blocks the shutdown signals in the calling thread and spawns the
/// controller thread that waits for one.
///
/// Must run before any other thread is spawned so every thread inherits the
/// blocked mask and delivery funnels into the controller's wait.
pub fn install(
    journal: Arc<Journal>,
    active: Arc<Mutex<ActiveCycle>>,
    mount: MountPoint,
) -> Result<(), nix::errno::Errno> {
    let mut mask = SigSet::empty();
    for signal in SHUTDOWN_SIGNALS {
        mask.add(signal);
    }
    mask.thread_block()?;

    thread::spawn(move || {
        let signal = loop {
            match mask.wait() {
                Ok(signal) => break signal,
                Err(err) => {
                    error!("Signal wait failed: {err}");
                    thread::sleep(Duration::from_secs(1));
                }
            }
        };

        journal.log(&format!("Caught signal {}, exiting", signal as i32));
        shutdown(&journal, &active, &mount);
        process::exit(0);
    });

    Ok(())
}

/// Tears down whatever the active cycle is running.
///
/// The lock is held for the whole teardown so the state machine cannot
/// replace or release a handle while it is being acted on.
fn shutdown(journal: &Journal, active: &Mutex<ActiveCycle>, mount: &MountPoint) {
    let mut guard = match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(mut syncer) = guard.syncer.take() {
        syncer.terminate(journal);
    }

    if let Some(mut mounter) = guard.mounter.take() {
        mount.unmount();
        mounter.wait_drained(journal);
    }
}
