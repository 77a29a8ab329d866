// src/exec/session.rs

//! Persistent shell session.
//!
//! A [`SessionShell`] starts one shell process and feeds it a sequence of
//! commands over stdin, so state such as the working directory and
//! environment variables carries from one command to the next. Each
//! command is followed by a marker echo (see [`crate::exec::marker`]); the
//! marker line tells us where the command's output ends and what its exit
//! code was.
//!
//! Timing rules:
//!
//! - the session clock starts once the shell is confirmed alive;
//! - each command gets `max(1s, 95% of the remaining session time)`;
//! - the session deadline fails whatever command is running when it fires.
//!
//! The process is always torn down at the end of a sequence, whatever the
//! outcome.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ExecError;
use crate::exec::dialect::Dialect;
use crate::exec::marker::Marker;
use crate::exec::terminate::{KILL_GRACE, force_kill, own_process_group, spawn_terminate};
use crate::exec::{ProcessKind, ProcessObserver};

/// Time the shell gets to start before we check that it is still alive.
const SETTLE_DELAY: Duration = Duration::from_millis(200);
const MIN_COMMAND_BUDGET: Duration = Duration::from_millis(1000);
const COMMAND_BUDGET_SHARE: f64 = 0.95;
const READ_CHUNK: usize = 8 * 1024;
/// Quiet period that ends the wait for trailing stderr.
const STDERR_LINGER: Duration = Duration::from_millis(50);

/// Result of one command in a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCommandResult {
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionCommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.error.is_none()
    }
}

/// Result of a whole sequence.
///
/// `commands` holds every command that completed, including a failing
/// last one. `final_working_directory` is empty unless the sequence
/// succeeded and the directory probe worked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub commands: Vec<SessionCommandResult>,
    pub final_working_directory: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

enum ShellChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

struct LiveShell {
    child: Child,
    stdin: ChildStdin,
    output_rx: mpsc::UnboundedReceiver<ShellChunk>,
    readers: Vec<JoinHandle<()>>,
    started: Instant,
    deadline: Instant,
}

pub struct SessionShell {
    dialect: Dialect,
    start_dir: PathBuf,
    timeout: Duration,
    grace: Duration,
    live: Option<LiveShell>,
}

impl std::fmt::Debug for SessionShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionShell")
            .field("dialect", &self.dialect)
            .field("start_dir", &self.start_dir)
            .field("timeout", &self.timeout)
            .field("running", &self.live.is_some())
            .finish()
    }
}

impl SessionShell {
    pub fn new(dialect: impl Into<Dialect>, start_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dialect: dialect.into(),
            start_dir: start_dir.into(),
            timeout,
            grace: KILL_GRACE,
            live: None,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run `commands` in order in one shell process, stopping at the first
    /// failure. Never returns an error: failures are reported in the
    /// outcome.
    pub async fn execute_sequence(
        &mut self,
        commands: &[String],
        cancel: &CancellationToken,
        observer: &dyn ProcessObserver,
    ) -> SessionOutcome {
        let mut completed = Vec::new();
        let result = self.run_sequence(commands, cancel, observer, &mut completed).await;
        self.teardown();

        match result {
            Ok(final_working_directory) => SessionOutcome {
                commands: completed,
                final_working_directory,
                success: true,
                error: None,
            },
            Err(e) => {
                info!(error = %e, completed = completed.len(), "session sequence failed");
                SessionOutcome {
                    commands: completed,
                    final_working_directory: String::new(),
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run_sequence(
        &mut self,
        commands: &[String],
        cancel: &CancellationToken,
        observer: &dyn ProcessObserver,
        completed: &mut Vec<SessionCommandResult>,
    ) -> Result<String, ExecError> {
        if commands.is_empty() {
            return Err(ExecError::InvalidSequence(
                "No commands provided for execution".into(),
            ));
        }
        if commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ExecError::InvalidSequence(
                "Empty command found in sequence".into(),
            ));
        }

        self.start(cancel, observer).await?;

        for command in commands {
            let result = self.execute_command(command.trim(), cancel).await?;
            debug!(
                command = %result.command,
                exit_code = result.exit_code,
                "session command completed"
            );

            if !result.succeeded() {
                let err = ExecError::CommandFailed {
                    command: result.command.clone(),
                    exit_code: result.exit_code,
                    message: result.error.clone().unwrap_or_else(|| {
                        format!("Command exited with code {}", result.exit_code)
                    }),
                };
                completed.push(result);
                return Err(err);
            }
            completed.push(result);
        }

        let pwd_command = self.dialect.pwd_command();
        match self.execute_command(pwd_command, cancel).await {
            Ok(probe) if probe.succeeded() => Ok(self.dialect.clean_pwd_output(&probe.output)),
            Ok(probe) => {
                warn!(exit_code = probe.exit_code, "working directory probe failed");
                Ok(String::new())
            }
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                warn!(error = %e, "working directory probe failed");
                Ok(String::new())
            }
        }
    }

    async fn start(
        &mut self,
        cancel: &CancellationToken,
        observer: &dyn ProcessObserver,
    ) -> Result<(), ExecError> {
        let (program, args) = self.dialect.spawn_args();

        let mut child = own_process_group(
            Command::new(program)
                .args(args)
                .current_dir(&self.start_dir)
                .env("TERM", "dumb")
                .env("PS1", "$ ")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true),
        )
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let Some(pid) = child.id() {
            observer.process_started(pid, ProcessKind::Shell);
        }
        info!(
            shell = program,
            pid = child.id(),
            cwd = %self.start_dir.display(),
            "session shell started"
        );

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            spawn_terminate(child, self.grace);
            return Err(ExecError::ShellDied("failed to create process streams".into()));
        };

        let (tx, output_rx) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_pump(stdout, tx.clone(), ShellChunk::Stdout),
            spawn_pump(stderr, tx, ShellChunk::Stderr),
        ];

        let now = Instant::now();
        self.live = Some(LiveShell {
            child,
            stdin,
            output_rx,
            readers,
            started: now,
            deadline: now + self.timeout,
        });

        tokio::select! {
            _ = tokio::time::sleep(SETTLE_DELAY) => {}
            _ = cancel.cancelled() => return Err(ExecError::SessionAborted),
        }

        let live = self
            .live
            .as_mut()
            .ok_or_else(|| ExecError::ShellDied("process not initialized".into()))?;
        if let Some(status) = live.child.try_wait()? {
            return Err(ExecError::ShellDied(format!(
                "process died during initialization ({status})"
            )));
        }

        let now = Instant::now();
        live.started = now;
        live.deadline = now + self.timeout;
        Ok(())
    }

    async fn execute_command(
        &mut self,
        command: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionCommandResult, ExecError> {
        let dialect = self.dialect;
        let session_timeout = self.timeout;
        let live = self
            .live
            .as_mut()
            .ok_or_else(|| ExecError::ShellDied("process not initialized".into()))?;

        // Output that arrived between commands belongs to nobody.
        while live.output_rx.try_recv().is_ok() {}

        let marker = Marker::generate();
        let budget = command_budget(session_timeout, live.started.elapsed());
        debug!(command, budget_ms = budget.as_millis() as u64, "sending command to session");

        live.stdin
            .write_all(dialect.wrap_command(command, &marker).as_bytes())
            .await?;
        live.stdin.flush().await?;

        let budget_timer = tokio::time::sleep(budget);
        let session_timer = tokio::time::sleep_until(live.deadline);
        tokio::pin!(budget_timer, session_timer);

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let found = loop {
            tokio::select! {
                chunk = live.output_rx.recv() => match chunk {
                    Some(ShellChunk::Stdout(bytes)) => {
                        stdout.extend_from_slice(&bytes);
                        if let Some(found) = marker.scan(&String::from_utf8_lossy(&stdout)) {
                            break found;
                        }
                    }
                    Some(ShellChunk::Stderr(bytes)) => stderr.extend_from_slice(&bytes),
                    None => {
                        return Err(ExecError::ShellDied(
                            "shell exited before the command completed".into(),
                        ));
                    }
                },
                _ = &mut budget_timer => {
                    return Err(ExecError::CommandTimeout {
                        after_ms: budget.as_millis() as u64,
                        command: command.to_string(),
                    });
                }
                _ = &mut session_timer => {
                    return Err(ExecError::SessionTimeout {
                        after_ms: session_timeout.as_millis() as u64,
                    });
                }
                _ = cancel.cancelled() => return Err(ExecError::SessionAborted),
            }
        };

        if found.exit_code != 0 && found.error.is_none() {
            collect_trailing_stderr(&mut live.output_rx, &mut stderr).await;
        }
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        let error = match found.error {
            Some(payload) => Some(payload),
            None if found.exit_code == 0 => None,
            None if !stderr.is_empty() => Some(stderr),
            None => Some(format!("Command exited with code {}", found.exit_code)),
        };
        Ok(SessionCommandResult {
            command: command.to_string(),
            output: found.output,
            exit_code: found.exit_code,
            error,
        })
    }

    /// Close stdin and terminate the shell in the background.
    pub fn teardown(&mut self) {
        if let Some(live) = self.live.take() {
            for reader in &live.readers {
                reader.abort();
            }
            drop(live.stdin);
            debug!(pid = live.child.id(), "tearing down session shell");
            spawn_terminate(live.child, self.grace);
        }
    }
}

impl Drop for SessionShell {
    fn drop(&mut self) {
        // Outside of a runtime we cannot run the graceful path; kill the
        // group here and let dropping the child reap the leader.
        if let Some(live) = self.live.take() {
            for reader in &live.readers {
                reader.abort();
            }
            if let Some(pid) = live.child.id() {
                force_kill(pid);
            }
        }
    }
}

/// stderr is pumped separately from stdout, so it can trail the marker.
async fn collect_trailing_stderr(rx: &mut mpsc::UnboundedReceiver<ShellChunk>, stderr: &mut Vec<u8>) {
    while let Ok(Some(chunk)) = tokio::time::timeout(STDERR_LINGER, rx.recv()).await {
        if let ShellChunk::Stderr(bytes) = chunk {
            stderr.extend_from_slice(&bytes);
        }
    }
}

/// Time allowed for a single command given how long the session has run.
pub fn command_budget(session_timeout: Duration, elapsed: Duration) -> Duration {
    session_timeout
        .saturating_sub(elapsed)
        .mul_f64(COMMAND_BUDGET_SHARE)
        .max(MIN_COMMAND_BUDGET)
}

fn spawn_pump<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<ShellChunk>,
    wrap: fn(Vec<u8>) -> ShellChunk,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "session output reader stopped");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_share_of_remaining_time_with_a_floor() {
        let budget = command_budget(Duration::from_secs(30), Duration::from_secs(10));
        let expected = Duration::from_secs(19);
        assert!(budget.abs_diff(expected) < Duration::from_millis(1));

        let floor = command_budget(Duration::from_secs(30), Duration::from_secs(29));
        assert_eq!(floor, MIN_COMMAND_BUDGET);

        let overdue = command_budget(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(overdue, MIN_COMMAND_BUDGET);
    }

    #[test]
    fn command_result_success_requires_zero_and_no_error() {
        let mut r = SessionCommandResult {
            command: "ls".into(),
            output: String::new(),
            exit_code: 0,
            error: None,
        };
        assert!(r.succeeded());
        r.error = Some("boom".into());
        assert!(!r.succeeded());
        r.error = None;
        r.exit_code = 2;
        assert!(!r.succeeded());
    }

    #[test]
    fn command_result_serializes_camel_case() {
        let r = SessionCommandResult {
            command: "pwd".into(),
            output: "/tmp".into(),
            exit_code: 0,
            error: None,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["exitCode"], 0);
        assert!(json.get("error").is_none());
    }
}
