// src/batch/mod.rs

//! Batch orchestration.
//!
//! - [`state`]: pure per-batch state machine (no Tokio).
//! - [`registry`]: id → batch map with retention sweeps.
//! - [`workspace`]: working-directory resolution and containment checks.
//! - [`orchestrator`]: the async side (execution loop, await, kill).

pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod workspace;

pub use orchestrator::{AwaitRequest, BatchHandle, BatchOrchestrator, BatchRequest};
pub use state::{AsyncAck, BatchSnapshot, BatchStatus, KillReason, SubmitResponse};
