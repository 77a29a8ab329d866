use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use codeact::exec::ProcessKind;
use codeact::ops::{Operation, OperationBackend, OperationContext, OperationOutput, OperationResult};
use tokio::sync::Notify;

/// What the scripted backend does for one operation index.
#[derive(Debug, Clone)]
pub enum Step {
    /// Succeed with output `op <index>`.
    Succeed,
    /// Return an error result with this message.
    Fail(String),
    /// Sleep, then succeed. Honours cancellation.
    Delay(Duration),
    /// Block until the batch is cancelled, then report an abort.
    UntilCancelled,
    /// Never return, even when cancelled.
    Stuck,
    /// Panic with this message.
    Panic(String),
}

/// A fake backend that:
/// - records which operation indexes were dispatched, per batch
/// - returns scripted results instead of touching processes or files
/// - reports a fake pid to the observer, so kill paths see an active process
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<HashMap<usize, Step>>>,
    executed: Arc<Mutex<Vec<(String, usize)>>>,
    started: Arc<Notify>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script index `index`; unscripted indexes succeed.
    pub fn at(self, index: usize, step: Step) -> Self {
        self.script.lock().unwrap().insert(index, step);
        self
    }

    /// Every `(batch_id, operation_index)` dispatched so far, in order.
    pub fn executed(&self) -> Vec<(String, usize)> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_indexes(&self) -> Vec<usize> {
        self.executed().into_iter().map(|(_, i)| i).collect()
    }

    /// Resolves once some operation has started since the last call.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

impl OperationBackend for ScriptedBackend {
    fn execute<'a>(
        &'a self,
        _op: &'a Operation,
        ctx: OperationContext<'a>,
    ) -> Pin<Box<dyn Future<Output = OperationResult> + Send + 'a>> {
        let step = self
            .script
            .lock()
            .unwrap()
            .get(&ctx.index)
            .cloned()
            .unwrap_or(Step::Succeed);
        self.executed
            .lock()
            .unwrap()
            .push((ctx.batch_id.to_string(), ctx.index));

        Box::pin(async move {
            // A pid that cannot belong to a live process.
            ctx.observer.process_started(i32::MAX as u32, ProcessKind::Code);
            self.started.notify_one();

            let ok = || OperationResult::success(ctx.index, OperationOutput::Text(format!("op {}", ctx.index)));
            let aborted = || OperationResult::failure(ctx.index, "Execution was aborted");

            match step {
                Step::Succeed => ok(),
                Step::Fail(message) => OperationResult::failure(ctx.index, message),
                Step::Delay(d) => tokio::select! {
                    _ = tokio::time::sleep(d) => ok(),
                    _ = ctx.cancel.cancelled() => aborted(),
                },
                Step::UntilCancelled => {
                    ctx.cancel.cancelled().await;
                    aborted()
                }
                Step::Stuck => std::future::pending().await,
                Step::Panic(message) => panic!("{message}"),
            }
        })
    }
}
