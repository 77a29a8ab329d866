// src/batch/orchestrator.rs

//! Async shell around the pure batch state machine.
//!
//! The orchestrator is responsible for:
//! - validating and registering submissions;
//! - running each batch's operations in order on a Tokio task;
//! - racing `await` calls against the batch's completion signal;
//! - killing batches (terminate the active process, cancel the token,
//!   wait for the loop to drain);
//! - evicting old terminal batches.
//!
//! All lifecycle decisions are delegated to [`BatchState`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::registry::BatchRegistry;
use crate::batch::state::{
    ActiveProcess, AsyncAck, BatchSnapshot, BatchState, BatchStatus, KillReason, LoopOutcome,
    SubmitResponse,
};
use crate::batch::workspace;
use crate::config::ServerConfig;
use crate::errors::{CodeactError, Result};
use crate::exec::terminate::{self, KILL_GRACE};
use crate::exec::{ProcessKind, ProcessObserver};
use crate::ops::{Operation, OperationBackend, OperationContext, OperationResult};

/// Extra time a kill waits for the execution loop beyond the grace window.
const KILL_MARGIN: Duration = Duration::from_secs(1);

/// A batch submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub operations: Vec<Operation>,
    #[serde(default = "default_sync")]
    pub sync: bool,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_sync() -> bool {
    true
}

/// Arguments of an `await` call. `timeout` is in seconds; absent or zero
/// waits forever.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitRequest {
    pub batch_id: String,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub kill_on_timeout: bool,
}

/// One registered batch: immutable inputs plus its mutable state.
#[derive(Debug)]
pub struct BatchHandle {
    id: String,
    operations: Arc<[Operation]>,
    working_dir: PathBuf,
    workspace_root: PathBuf,
    state: Mutex<BatchState>,
    cancel: CancellationToken,
    done_tx: watch::Sender<bool>,
}

impl BatchHandle {
    pub fn new(
        id: String,
        operations: Vec<Operation>,
        working_dir: PathBuf,
        workspace_root: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            id,
            state: Mutex::new(BatchState::new(operations.len(), now)),
            operations: operations.into(),
            working_dir,
            workspace_root,
            cancel: CancellationToken::new(),
            done_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn status(&self) -> BatchStatus {
        self.state.lock().status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().is_terminal()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.state.lock().created_at()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().completed_at()
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        self.state.lock().snapshot(&self.id)
    }

    /// Decide the final status and fire the completion signal.
    /// Returns `false` if the batch was already terminal.
    pub fn finalize(&self, outcome: LoopOutcome, now: DateTime<Utc>) -> bool {
        let changed = self.state.lock().finalize(outcome, now);
        self.done_tx.send_replace(true);
        changed
    }

    async fn wait_done(&self) {
        let mut rx = self.done_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Records every process an operation spawns in the batch's active slot.
struct BatchProcessObserver<'a> {
    handle: &'a BatchHandle,
    index: usize,
}

impl ProcessObserver for BatchProcessObserver<'_> {
    fn process_started(&self, pid: u32, kind: ProcessKind) {
        debug!(batch_id = %self.handle.id, operation_index = self.index, pid, ?kind, "process registered");
        self.handle.state.lock().set_active_process(ActiveProcess {
            pid,
            operation_index: self.index,
            kind,
        });
    }
}

struct Inner<B> {
    config: Arc<ServerConfig>,
    backend: B,
    registry: BatchRegistry,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    kill_grace: Duration,
}

impl<B> Inner<B> {
    fn sweep(&self) -> usize {
        let retention = &self.config.retention;
        self.registry
            .sweep(Utc::now(), retention.max_age(), retention.max_batch_history)
            .len()
    }
}

/// Entry point for submitting, awaiting and killing batches.
///
/// Cheap to clone; all clones share one registry.
pub struct BatchOrchestrator<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for BatchOrchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: OperationBackend> BatchOrchestrator<B> {
    pub fn new(config: Arc<ServerConfig>, backend: B) -> Self {
        Self::with_kill_grace(config, backend, KILL_GRACE)
    }

    /// Like [`BatchOrchestrator::new`] with a custom terminate-to-kill
    /// window.
    pub fn with_kill_grace(config: Arc<ServerConfig>, backend: B, kill_grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                backend,
                registry: BatchRegistry::new(),
                sweeper: Mutex::new(None),
                kill_grace,
            }),
        }
    }

    /// Validate, register and run (or schedule) a batch.
    pub async fn submit(&self, request: BatchRequest) -> Result<SubmitResponse> {
        let config = &self.inner.config;
        let total = request.operations.len();
        if total == 0 {
            return Err(CodeactError::Validation(
                "Batch must contain at least one operation".into(),
            ));
        }
        if total > config.security.max_batch_size {
            return Err(CodeactError::Validation(format!(
                "Batch size {total} exceeds the maximum of {}",
                config.security.max_batch_size
            )));
        }

        let ws = match request.workspace.as_deref() {
            Some(id) => config
                .workspace(id)
                .ok_or_else(|| CodeactError::Validation(format!("Unknown workspace '{id}'")))?,
            None => config.default_workspace(),
        };
        let root = ws.root().to_path_buf();
        let working_dir = workspace::resolve_within(&root, &root, request.working_dir.as_deref())?;

        for (index, op) in request.operations.iter().enumerate() {
            workspace::resolve_within(&root, &working_dir, op.working_dir()).map_err(|e| {
                CodeactError::PathNotAllowed(format!("operation {index}: {}", strip_prefix(&e)))
            })?;
            if let Operation::CodeExec(code) = op {
                if !config.runtimes.get(code.runtime).enabled {
                    return Err(CodeactError::Validation(format!(
                        "operation {index}: runtime {} is not enabled",
                        code.runtime
                    )));
                }
            }
        }

        let handle = Arc::new(BatchHandle::new(
            Uuid::new_v4().to_string(),
            request.operations,
            working_dir,
            root,
            Utc::now(),
        ));
        self.inner
            .registry
            .register(Arc::clone(&handle), config.security.max_concurrent_batches)?;

        info!(
            batch_id = %handle.id,
            workspace = %ws.id,
            operations = total,
            sync = request.sync,
            "batch registered"
        );

        if request.sync {
            let snapshot = run_guarded(Arc::clone(&self.inner), Arc::clone(&handle)).await;
            self.inner.registry.unregister(&handle.id);
            Ok(SubmitResponse::Sync(snapshot))
        } else {
            let inner = Arc::clone(&self.inner);
            let batch = Arc::clone(&handle);
            tokio::spawn(async move {
                run_guarded(inner, batch).await;
            });
            Ok(SubmitResponse::Async(AsyncAck {
                batch_id: handle.id.clone(),
                status: BatchStatus::Queued,
            }))
        }
    }

    /// Wait for a batch to finish, optionally bounded by a timeout.
    pub async fn await_batch(&self, request: AwaitRequest) -> Result<BatchSnapshot> {
        let handle = self.lookup(&request.batch_id)?;
        if handle.is_terminal() {
            return Ok(handle.snapshot());
        }

        let Some(secs) = request.timeout.filter(|s| *s > 0) else {
            handle.wait_done().await;
            return Ok(handle.snapshot());
        };

        match tokio::time::timeout(Duration::from_secs(secs), handle.wait_done()).await {
            Ok(()) => Ok(handle.snapshot()),
            Err(_) if request.kill_on_timeout => {
                info!(batch_id = %handle.id, timeout_secs = secs, "await timed out; killing batch");
                self.kill_handle(&handle, KillReason::AwaitTimeout { after_secs: secs })
                    .await;
                Ok(handle.snapshot())
            }
            Err(_) => {
                debug!(batch_id = %handle.id, timeout_secs = secs, "await timed out");
                let mut snapshot = handle.snapshot();
                if !snapshot.status.is_terminal() {
                    snapshot.status = BatchStatus::Running;
                }
                Ok(snapshot)
            }
        }
    }

    /// Kill a batch. No-op on a terminal batch.
    pub async fn kill_batch(&self, batch_id: &str) -> Result<()> {
        let handle = self.lookup(batch_id)?;
        self.kill_handle(&handle, KillReason::Manual).await;
        Ok(())
    }

    /// Kill every registered batch and empty the registry.
    pub async fn kill_all_before_shutdown(&self) {
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }

        let ids = self.inner.registry.ids();
        info!(count = ids.len(), "killing all batches before shutdown");

        let mut kills = JoinSet::new();
        for id in ids {
            let this = self.clone();
            kills.spawn(async move {
                if let Err(e) = this.kill_batch(&id).await {
                    debug!(batch_id = %id, error = %e, "batch vanished before kill");
                }
            });
        }
        while let Some(res) = kills.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "kill task failed");
            }
        }

        self.inner.registry.clear();
    }

    /// Run one retention sweep now. Returns the number of evicted batches.
    pub fn sweep_now(&self) -> usize {
        self.inner.sweep()
    }

    /// Start the periodic retention sweep, replacing a previous one.
    pub fn spawn_retention_sweeper(&self) {
        let period = self.inner.config.retention.cleanup_interval();
        let weak: Weak<Inner<B>> = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = inner.sweep();
                debug!(evicted, "retention sweep");
            }
        });

        if let Some(previous) = self.inner.sweeper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Registered batches that have not finished.
    pub fn active_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    pub fn registered_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        self.inner.registry.get(batch_id).map(|h| h.snapshot())
    }

    fn lookup(&self, batch_id: &str) -> Result<Arc<BatchHandle>> {
        self.inner
            .registry
            .get(batch_id)
            .ok_or_else(|| CodeactError::BatchNotFound(batch_id.to_string()))
    }

    async fn kill_handle(&self, handle: &Arc<BatchHandle>, reason: KillReason) {
        let active = {
            let mut state = handle.state.lock();
            if !state.request_kill(reason) {
                debug!(batch_id = %handle.id, "kill on terminal batch ignored");
                return;
            }
            state.active_process()
        };

        let grace = self.inner.kill_grace;
        if let Some(process) = active {
            info!(batch_id = %handle.id, pid = process.pid, ?reason, "terminating active process");
            if terminate::request_terminate(process.pid) {
                let batch = Arc::clone(handle);
                tokio::spawn(async move {
                    tokio::time::sleep(grace).await;
                    let still_active = batch
                        .state
                        .lock()
                        .active_process()
                        .is_some_and(|p| p.pid == process.pid);
                    if still_active {
                        warn!(batch_id = %batch.id, pid = process.pid, "process survived terminate; force killing");
                        terminate::force_kill(process.pid);
                    }
                });
            }
        }

        handle.cancel.cancel();

        if tokio::time::timeout(grace + KILL_MARGIN, handle.wait_done())
            .await
            .is_err()
        {
            warn!(batch_id = %handle.id, "execution loop did not stop in time; forcing final state");
            handle.finalize(LoopOutcome::Interrupted, Utc::now());
        }

        info!(batch_id = %handle.id, status = %handle.status(), "batch killed");
    }
}

/// Run the batch on its own task so a panic outside an operation still
/// leaves the batch in a terminal state.
async fn run_guarded<B: OperationBackend>(
    inner: Arc<Inner<B>>,
    handle: Arc<BatchHandle>,
) -> BatchSnapshot {
    let batch = Arc::clone(&handle);
    let task = tokio::spawn(async move { run_batch(&inner, &batch).await });

    if let Err(e) = task.await {
        error!(batch_id = %handle.id, error = %e, "batch execution task failed");
        handle.finalize(
            LoopOutcome::Failed(format!("Unexpected error: {e}")),
            Utc::now(),
        );
    }
    handle.snapshot()
}

async fn run_batch<B: OperationBackend>(inner: &Inner<B>, handle: &BatchHandle) {
    let began = handle.state.lock().begin(Utc::now());
    let outcome = if began {
        info!(batch_id = %handle.id, dir = %handle.working_dir.display(), "batch started");
        execute_operations(inner, handle).await
    } else {
        debug!(batch_id = %handle.id, "batch killed before it started");
        LoopOutcome::Interrupted
    };

    handle.finalize(outcome, Utc::now());
    let snapshot = handle.snapshot();
    info!(
        batch_id = %handle.id,
        status = %snapshot.status,
        completed = snapshot.operations_completed,
        total = snapshot.operations_total,
        "batch finished"
    );
}

async fn execute_operations<B: OperationBackend>(inner: &Inner<B>, handle: &BatchHandle) -> LoopOutcome {
    for (index, op) in handle.operations.iter().enumerate() {
        if handle.cancel.is_cancelled() {
            return LoopOutcome::Interrupted;
        }

        let result = match workspace::resolve_within(
            &handle.workspace_root,
            &handle.working_dir,
            op.working_dir(),
        ) {
            Ok(dir) => {
                let observer = BatchProcessObserver { handle, index };
                let ctx = OperationContext {
                    batch_id: &handle.id,
                    index,
                    working_dir: &dir,
                    workspace_root: &handle.workspace_root,
                    cancel: &handle.cancel,
                    observer: &observer,
                };
                dispatch_caught(&inner.backend, op, ctx).await
            }
            Err(e) => OperationResult::failure(index, e.to_string()),
        };

        let failure = result.is_error().then(|| {
            format!(
                "Operation {index} ({}) failed: {}",
                op.kind_name(),
                result.error.as_deref().unwrap_or("unknown error")
            )
        });

        {
            let mut state = handle.state.lock();
            state.clear_active_process();
            if !state.record_result(result) {
                // Finalized from outside while the operation ran.
                return LoopOutcome::Interrupted;
            }
        }

        if let Some(message) = failure {
            return LoopOutcome::Failed(message);
        }
    }
    LoopOutcome::Completed
}

/// Dispatch one operation, turning a panic into an error result for it.
async fn dispatch_caught<B: OperationBackend>(
    backend: &B,
    op: &Operation,
    ctx: OperationContext<'_>,
) -> OperationResult {
    match AssertUnwindSafe(backend.execute(op, ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(batch_id = %ctx.batch_id, index = ctx.index, panic = %message, "operation panicked");
            OperationResult::failure(ctx.index, format!("Unexpected error: {message}"))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "operation panicked".to_string())
}

fn strip_prefix(err: &CodeactError) -> String {
    match err {
        CodeactError::PathNotAllowed(msg) => msg.clone(),
        other => other.to_string(),
    }
}
