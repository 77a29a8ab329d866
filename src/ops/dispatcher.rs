// src/ops/dispatcher.rs

//! Pluggable operation backend.
//!
//! The batch orchestrator talks to an [`OperationBackend`] instead of
//! calling the process runner or the filesystem directly. Production code
//! uses [`OperationDispatcher`]; tests can provide a backend that records
//! which operations were dispatched and returns scripted results.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::exec::{ProcessObserver, ProcessRunner};
use crate::fs::FileSystem;
use crate::ops::{Operation, OperationResult, code_exec, dir_create, file_write, shell_exec};

/// Everything an operation needs from the batch it belongs to.
///
/// Borrowed for the duration of one `execute` call.
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub batch_id: &'a str,
    pub index: usize,
    /// Resolved directory for this operation (already validated).
    pub working_dir: &'a Path,
    pub workspace_root: &'a Path,
    pub cancel: &'a CancellationToken,
    pub observer: &'a dyn ProcessObserver,
}

impl std::fmt::Debug for OperationContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationContext")
            .field("batch_id", &self.batch_id)
            .field("index", &self.index)
            .field("working_dir", &self.working_dir)
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

/// Trait abstracting how a single operation is executed.
///
/// Implementations never fail: every problem is reported as an error
/// [`OperationResult`].
pub trait OperationBackend: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        op: &'a Operation,
        ctx: OperationContext<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>>;
}

/// Production backend: routes each operation type to its executor.
#[derive(Debug, Clone)]
pub struct OperationDispatcher {
    fs: Arc<dyn FileSystem>,
    config: Arc<ServerConfig>,
    runner: ProcessRunner,
}

impl OperationDispatcher {
    pub fn new(fs: Arc<dyn FileSystem>, config: Arc<ServerConfig>) -> Self {
        Self {
            fs,
            config,
            runner: ProcessRunner::new(),
        }
    }
}

impl OperationBackend for OperationDispatcher {
    fn execute<'a>(
        &'a self,
        op: &'a Operation,
        ctx: OperationContext<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        Box::pin(async move {
            info!(
                batch_id = %ctx.batch_id,
                operation_index = ctx.index,
                kind = op.kind_name(),
                dir = %ctx.working_dir.display(),
                "dispatching operation"
            );

            let result = match op {
                Operation::FileWrite(op) => file_write::execute(self.fs.as_ref(), op, &ctx),
                Operation::DirCreate(op) => dir_create::execute(self.fs.as_ref(), op, &ctx),
                Operation::ShellExec(op) => shell_exec::execute(&self.config.shell, op, &ctx).await,
                Operation::CodeExec(op) => {
                    code_exec::execute(
                        self.fs.as_ref(),
                        &self.runner,
                        &self.config.runtimes,
                        op,
                        &ctx,
                    )
                    .await
                }
            };

            debug!(
                batch_id = %ctx.batch_id,
                operation_index = ctx.index,
                error = result.is_error(),
                "operation finished"
            );
            result
        })
    }
}
