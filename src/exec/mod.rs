// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running child processes with
//! `tokio::process::Command`:
//!
//! - [`process`] runs one process to completion (`ProcessRunner`), racing
//!   its exit against a timeout and a cancellation token.
//! - [`session`] keeps one shell alive across a sequence of commands
//!   (`SessionShell`).
//! - [`dialect`] and [`marker`] hold the per-shell protocol details the
//!   session relies on.
//! - [`terminate`] implements graceful-then-forced termination.

pub mod dialect;
pub mod marker;
pub mod process;
pub mod session;
pub mod terminate;

use serde::Serialize;

pub use dialect::Dialect;
pub use process::{ProcessRunner, ProcessSpec};
pub use session::{SessionCommandResult, SessionOutcome, SessionShell};
pub use terminate::KILL_GRACE;

/// What a spawned process is doing on behalf of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessKind {
    Shell,
    Code,
}

/// Notified whenever a runner spawns a process, so the owner of the work
/// (the batch) can terminate it from outside.
pub trait ProcessObserver: Send + Sync {
    fn process_started(&self, pid: u32, kind: ProcessKind);
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProcessObserver for NoopObserver {
    fn process_started(&self, _pid: u32, _kind: ProcessKind) {}
}
