// src/errors.rs

//! Crate-wide error types.
//!
//! - [`CodeactError`] covers configuration, validation and registry
//!   failures. These are returned to the caller of the orchestrator.
//! - [`ExecError`] covers everything that can go wrong while a process or
//!   shell session is running. The dispatcher always converts these into
//!   error `OperationResult`s, so they never escape a batch.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeactError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Batch with ID {0} is not registered")]
    BatchNotFound(String),

    #[error("Batch with ID {0} is already registered")]
    DuplicateBatch(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failures of a spawned process or shell session.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}", exited_message(.program, .code, .stderr))]
    Exited {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Process timeout after {after_ms}ms")]
    ProcessTimeout { after_ms: u64 },

    #[error("Command timeout after {after_ms}ms: {command}")]
    CommandTimeout { after_ms: u64, command: String },

    #[error("Session timeout after {after_ms}ms")]
    SessionTimeout { after_ms: u64 },

    #[error("Execution was aborted")]
    Cancelled,

    #[error("Shell session aborted")]
    SessionAborted,

    #[error("Shell process died: {0}")]
    ShellDied(String),

    #[error("{0}")]
    InvalidSequence(String),

    #[error("Command failed: \"{command}\"\nExit code: {exit_code}\nError: {message}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// True for every timeout flavour (process, command, session).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ExecError::ProcessTimeout { .. }
                | ExecError::CommandTimeout { .. }
                | ExecError::SessionTimeout { .. }
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ExecError::Cancelled | ExecError::SessionAborted)
    }
}

fn exited_message(program: &str, code: &Option<i32>, stderr: &str) -> String {
    let code = code.map_or_else(|| "unknown".to_string(), |c| c.to_string());
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{program} execution failed with exit code {code}")
    } else {
        format!("{program} execution failed with exit code {code}:\n{stderr}")
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CodeactError>;
