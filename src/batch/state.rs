// src/batch/state.rs

//! Pure per-batch state machine.
//!
//! `BatchState` holds everything that changes while a batch runs and
//! enforces the lifecycle rules:
//!
//! - `Queued → Running` happens once, and not at all for a batch that was
//!   killed before it started;
//! - the final status is decided exactly once, in [`BatchState::finalize`];
//! - a terminal batch is frozen: results, status, error and timestamps no
//!   longer change.
//!
//! There are no Tokio types here; timestamps are passed in by the caller,
//! which keeps the whole module unit-testable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::exec::ProcessKind;
use crate::ops::OperationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Killed,
    Timeout,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Killed | BatchStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Killed => "killed",
            BatchStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which kind of kill was requested. The first request wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillReason {
    Manual,
    AwaitTimeout { after_secs: u64 },
}

impl KillReason {
    pub fn status(self) -> BatchStatus {
        match self {
            KillReason::Manual => BatchStatus::Killed,
            KillReason::AwaitTimeout { .. } => BatchStatus::Timeout,
        }
    }

    pub fn message(self) -> String {
        match self {
            KillReason::Manual => "Batch was manually killed".to_string(),
            KillReason::AwaitTimeout { after_secs } => {
                format!("Batch killed due to await timeout ({after_secs}s)")
            }
        }
    }
}

/// The process currently running on behalf of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProcess {
    pub pid: u32,
    pub operation_index: usize,
    pub kind: ProcessKind,
}

/// How the execution loop ended, before kill requests are taken into
/// account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Every operation ran and the last one succeeded.
    Completed,
    /// Stopped at an error result or an unexpected error.
    Failed(String),
    /// Stopped by cancellation before running everything.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct BatchState {
    status: BatchStatus,
    operations_total: usize,
    results: Vec<OperationResult>,
    active_process: Option<ActiveProcess>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    kill_request: Option<KillReason>,
}

impl BatchState {
    pub fn new(operations_total: usize, now: DateTime<Utc>) -> Self {
        Self {
            status: BatchStatus::Queued,
            operations_total,
            results: Vec::new(),
            active_process: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            kill_request: None,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of attempted operations.
    pub fn operations_completed(&self) -> usize {
        self.results.len()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn active_process(&self) -> Option<ActiveProcess> {
        self.active_process
    }

    /// Move `Queued → Running`. Returns `false` when the batch must not run
    /// at all (already killed or terminal).
    pub fn begin(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != BatchStatus::Queued || self.kill_request.is_some() {
            return false;
        }
        self.status = BatchStatus::Running;
        self.started_at = Some(now);
        true
    }

    pub fn set_active_process(&mut self, process: ActiveProcess) {
        if self.is_terminal() {
            return;
        }
        if let Some(previous) = self.active_process.replace(process) {
            warn!(
                previous_pid = previous.pid,
                pid = process.pid,
                "active process slot was still occupied"
            );
        }
    }

    pub fn clear_active_process(&mut self) {
        self.active_process = None;
    }

    /// Append a result. Ignored (returns `false`) once terminal.
    pub fn record_result(&mut self, result: OperationResult) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.results.push(result);
        true
    }

    /// Record a kill request. Returns `false` if the batch is already
    /// terminal; an earlier request of another flavour is kept.
    pub fn request_kill(&mut self, reason: KillReason) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.kill_request.get_or_insert(reason);
        true
    }

    /// Decide the final status. Only the first call has any effect.
    ///
    /// A pending kill request overrides a failed or interrupted loop; a
    /// loop that attempted every operation successfully stays completed.
    pub fn finalize(&mut self, outcome: LoopOutcome, now: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }

        let (status, error) = match (outcome, self.kill_request) {
            (LoopOutcome::Completed, _) => (BatchStatus::Completed, None),
            (_, Some(reason)) => (reason.status(), Some(reason.message())),
            (LoopOutcome::Failed(message), None) => (BatchStatus::Failed, Some(message)),
            (LoopOutcome::Interrupted, None) => {
                (BatchStatus::Killed, Some(KillReason::Manual.message()))
            }
        };

        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.active_process = None;
        true
    }

    pub fn snapshot(&self, batch_id: &str) -> BatchSnapshot {
        BatchSnapshot {
            batch_id: batch_id.to_string(),
            status: self.status,
            operations_total: self.operations_total,
            operations_completed: self.operations_completed(),
            results: self.results.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Externally visible view of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub status: BatchStatus,
    pub operations_total: usize,
    pub operations_completed: usize,
    pub results: Vec<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Reply to an asynchronous submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncAck {
    pub batch_id: String,
    pub status: BatchStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubmitResponse {
    Sync(BatchSnapshot),
    Async(AsyncAck),
}
