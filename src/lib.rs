//! Backupg is a small daemon that periodically mirrors local and remote file
//! trees into volumes exposed through a mountable network filesystem. For each
//! configured target it coordinates two external processes, a mount daemon and
//! a sync tool, through a create→mount→sync→unmount cycle, and tears both down
//! cleanly when interrupted.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Per-target backup cycle orchestration.
pub mod cycle;

/// Outer scheduling loop, single-instance guard and daemonization.
pub mod daemon;

/// Error handling.
pub mod error;

/// Journal management.
pub mod logs;

/// Mount-state queries and unmount requests.
pub mod mount;

/// Signal-driven graceful shutdown.
pub mod signals;

/// Spawning and supervising the external processes.
pub mod supervisor;
