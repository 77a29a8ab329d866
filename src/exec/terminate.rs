// src/exec/terminate.rs

//! Two-step process termination.
//!
//! Every child is spawned as the leader of its own process group (see
//! [`own_process_group`]), and signals go to the whole group so anything it
//! started goes down with it. A graceful terminate request (SIGTERM on Unix)
//! is sent first; if the process is still alive after [`KILL_GRACE`], it is
//! force-killed. Some processes ignore SIGTERM, so the second step is never
//! skipped.
//!
//! On non-Unix platforms there is no graceful signal for an arbitrary pid,
//! so the forced kill is used directly.

use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Grace window between the terminate request and the forced kill.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// Start the command as the leader of a new process group, so its pid
/// doubles as the group id.
pub fn own_process_group(command: &mut Command) -> &mut Command {
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Send a graceful terminate request to the process group led by `pid`.
///
/// Returns `true` if the signal was delivered. A group that is already gone
/// is not an error.
pub fn request_terminate(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        debug!(pid, "no graceful terminate on this platform");
        false
    }
}

/// Force-kill the process group led by `pid` without owning its `Child`.
pub fn force_kill(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        debug!(pid, "pid-based kill unsupported on this platform; relying on cancellation");
        false
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        warn!(pid, "pid out of range; not signalling");
        return false;
    };

    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => {
            debug!(pgid = pid, ?signal, "signal sent to process group");
            true
        }
        Err(Errno::ESRCH) => {
            debug!(pgid = pid, ?signal, "process group already gone");
            false
        }
        Err(e) => {
            warn!(pgid = pid, ?signal, error = %e, "failed to signal process group");
            false
        }
    }
}

/// Terminate an owned child: graceful request, wait up to `grace`, then kill.
///
/// No-op if the child has already exited.
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    // Captured up front: `id()` is `None` once the leader has been reaped,
    // but the rest of its group may still be running.
    let pgid = child.id();

    if let Ok(Some(status)) = child.try_wait() {
        debug!(?status, "child already exited");
        kill_stragglers(pgid);
        return;
    }

    let graceful = pgid.is_some_and(request_terminate);
    if graceful {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(?status, "child exited after terminate request");
                kill_stragglers(pgid);
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "error waiting for child after terminate request");
            }
            Err(_) => {
                warn!(
                    pid = pgid,
                    grace_ms = grace.as_millis() as u64,
                    "child ignored terminate request; force killing"
                );
            }
        }
    }

    kill_stragglers(pgid);
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill child process");
    }
}

/// SIGKILL whatever is left in the group once the leader is done.
fn kill_stragglers(pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        force_kill(pgid);
    }
}

/// Run [`terminate_child`] on a detached task, taking ownership of the child.
///
/// Used by teardown paths that must not block on the grace window.
pub fn spawn_terminate(mut child: Child, grace: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        terminate_child(&mut child, grace).await;
    })
}
