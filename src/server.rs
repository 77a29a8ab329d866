// src/server.rs

//! Line-delimited JSON request loop.
//!
//! Each input line is one request:
//!
//! ```json
//! {"id": 1, "tool": "batch-execute", "args": {"operations": [...]}}
//! {"id": 2, "tool": "batch-await", "args": {"batchId": "...", "timeout": 30}}
//! ```
//!
//! Each response is one line, `{"id", "result"}` or `{"id", "error"}`.
//! Requests run concurrently, so responses may come back out of order.
//! When input ends or `shutdown` fires, every batch is killed and the
//! in-flight requests are drained before returning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{AwaitRequest, BatchOrchestrator, BatchRequest};
use crate::errors::{CodeactError, Result};
use crate::ops::OperationBackend;

pub const TOOL_BATCH_EXECUTE: &str = "batch-execute";
pub const TOOL_BATCH_AWAIT: &str = "batch-await";

/// Upper bound on waiting for in-flight requests after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ToolResponse {
    Ok { id: Value, result: Value },
    Err { id: Value, error: String },
}

/// Serve requests from `input` until EOF or `shutdown`, writing responses
/// to `output`.
pub async fn serve<B, R, W>(
    orchestrator: BatchOrchestrator<B>,
    input: R,
    output: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    B: OperationBackend,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_responses(output, rx));

    let mut lines = BufReader::new(input).lines();
    let mut in_flight = JoinSet::new();

    info!("accepting requests on stdin");
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let orchestrator = orchestrator.clone();
                    let tx = tx.clone();
                    in_flight.spawn(async move {
                        let response = handle_line(&orchestrator, &line).await;
                        match serde_json::to_string(&response) {
                            Ok(text) => {
                                let _ = tx.send(text);
                            }
                            Err(e) => warn!(error = %e, "failed to encode response"),
                        }
                    });
                }
                Ok(None) => {
                    info!("input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read request line");
                    break;
                }
            },
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                break;
            }
            Some(res) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = res {
                    warn!(error = %e, "request task failed");
                }
            }
        }
    }

    orchestrator.kill_all_before_shutdown().await;

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while in_flight.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("in-flight requests did not finish; aborting them");
        in_flight.abort_all();
    }

    drop(tx);
    writer.await??;
    Ok(())
}

async fn write_responses<W>(mut output: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(())
}

async fn handle_line<B: OperationBackend>(orchestrator: &BatchOrchestrator<B>, line: &str) -> ToolResponse {
    let request: ToolRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return ToolResponse::Err {
                id: Value::Null,
                error: format!("Invalid request: {e}"),
            };
        }
    };

    debug!(tool = %request.tool, id = %request.id, "request received");
    let id = request.id.clone();
    match dispatch(orchestrator, request).await {
        Ok(result) => ToolResponse::Ok { id, result },
        Err(e) => ToolResponse::Err {
            id,
            error: e.to_string(),
        },
    }
}

async fn dispatch<B: OperationBackend>(
    orchestrator: &BatchOrchestrator<B>,
    request: ToolRequest,
) -> Result<Value> {
    match request.tool.as_str() {
        TOOL_BATCH_EXECUTE => {
            let args: BatchRequest = serde_json::from_value(request.args)?;
            let response = orchestrator.submit(args).await?;
            Ok(serde_json::to_value(response)?)
        }
        TOOL_BATCH_AWAIT => {
            let args: AwaitRequest = serde_json::from_value(request.args)?;
            let snapshot = orchestrator.await_batch(args).await?;
            Ok(serde_json::to_value(snapshot)?)
        }
        other => Err(CodeactError::Validation(format!("Unknown tool '{other}'"))),
    }
}
