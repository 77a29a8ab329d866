// src/exec/process.rs

//! One-shot process runner.
//!
//! Spawns a program with piped stdout/stderr, collects both streams in
//! full, and races the exit against a timeout and a cancellation token.
//! On timeout or cancellation the child is terminated gracefully first and
//! force-killed after the grace window.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::ExecError;
use crate::exec::terminate::{KILL_GRACE, own_process_group, terminate_child};
use crate::exec::{ProcessKind, ProcessObserver};

/// How long to wait for the output readers once the child has exited.
/// Grandchildren that inherited the pipes can keep them open forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start one process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub kind: ProcessKind,
}

#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self { grace: KILL_GRACE }
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the terminate-to-kill grace window.
    pub fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }

    /// Run `spec` to completion and return its stdout.
    ///
    /// A non-zero exit becomes [`ExecError::Exited`] carrying stderr.
    pub async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
        observer: &dyn ProcessObserver,
    ) -> Result<String, ExecError> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let mut child = own_process_group(
            Command::new(&spec.program)
                .args(&spec.args)
                .current_dir(&spec.cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true),
        )
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let pid = child.id();
        if let Some(pid) = pid {
            observer.process_started(pid, spec.kind);
        }
        info!(
            program = %spec.program,
            pid,
            cwd = %spec.cwd.display(),
            timeout_ms = spec.timeout.as_millis() as u64,
            "process started"
        );

        let stdout_task = child.stdout.take().map(spawn_reader);
        let stderr_task = child.stderr.take().map(spawn_reader);

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status),
            _ = tokio::time::sleep(spec.timeout) => Outcome::TimedOut,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(Ok(status)) => {
                let stdout = drain(stdout_task).await;
                let stderr = drain(stderr_task).await;
                debug!(program = %spec.program, pid, ?status, "process exited");
                if status.success() {
                    Ok(stdout)
                } else {
                    Err(ExecError::Exited {
                        program: spec.program.clone(),
                        code: status.code(),
                        stderr,
                    })
                }
            }
            Outcome::Exited(Err(e)) => {
                abort(stdout_task);
                abort(stderr_task);
                Err(ExecError::Io(e))
            }
            Outcome::TimedOut => {
                warn!(program = %spec.program, pid, "process timed out; terminating");
                terminate_child(&mut child, self.grace).await;
                abort(stdout_task);
                abort(stderr_task);
                Err(ExecError::ProcessTimeout {
                    after_ms: spec.timeout.as_millis() as u64,
                })
            }
            Outcome::Cancelled => {
                info!(program = %spec.program, pid, "process cancelled; terminating");
                terminate_child(&mut child, self.grace).await;
                abort(stdout_task);
                abort(stderr_task);
                Err(ExecError::Cancelled)
            }
        }
    }
}

fn spawn_reader<R>(mut reader: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buf).await {
            debug!(error = %e, "output reader stopped early");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut task).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            String::new()
        }
        Err(_) => {
            warn!("output pipe still open after exit; discarding");
            task.abort();
            String::new()
        }
    }
}

fn abort(task: Option<JoinHandle<String>>) {
    if let Some(task) = task {
        task.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::NoopObserver;
    use parking_lot::Mutex;
    use std::time::Instant;

    fn sh(script: &str, timeout: Duration) -> ProcessSpec {
        ProcessSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: std::env::temp_dir(),
            timeout,
            kind: ProcessKind::Code,
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u32, ProcessKind)>>);

    impl ProcessObserver for Recorder {
        fn process_started(&self, pid: u32, kind: ProcessKind) {
            self.0.lock().push((pid, kind));
        }
    }

    #[tokio::test]
    async fn returns_stdout_on_success_and_reports_pid() {
        let recorder = Recorder::default();
        let out = ProcessRunner::new()
            .run(
                &sh("echo hello", Duration::from_secs(5)),
                &CancellationToken::new(),
                &recorder,
            )
            .await
            .unwrap();

        assert_eq!(out, "hello\n");
        let seen = recorder.0.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, ProcessKind::Code);
    }

    #[tokio::test]
    async fn nonzero_exit_carries_stderr() {
        let err = ProcessRunner::new()
            .run(
                &sh("echo boom >&2; exit 3", Duration::from_secs(5)),
                &CancellationToken::new(),
                &NoopObserver,
            )
            .await
            .unwrap_err();

        match err {
            ExecError::Exited { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn timeout_terminates_the_process() {
        let started = Instant::now();
        let err = ProcessRunner::with_grace(Duration::from_millis(200))
            .run(
                &sh("sleep 30", Duration::from_millis(300)),
                &CancellationToken::new(),
                &NoopObserver,
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("timeout"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_process() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let err = ProcessRunner::with_grace(Duration::from_millis(200))
            .run(&sh("sleep 30", Duration::from_secs(30)), &cancel, &NoopObserver)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Cancelled));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let spec = ProcessSpec {
            program: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            cwd: std::env::temp_dir(),
            timeout: Duration::from_secs(1),
            kind: ProcessKind::Code,
        };
        let err = ProcessRunner::new()
            .run(&spec, &CancellationToken::new(), &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }
}
