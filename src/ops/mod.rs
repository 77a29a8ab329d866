// src/ops/mod.rs

//! Operation model and execution.
//!
//! An [`Operation`] is one unit of work inside a batch. The wire format is
//! internally tagged by `type`:
//!
//! ```json
//! { "type": "shell_exec", "commands": ["ls"], "shell": "bash" }
//! ```
//!
//! Execution goes through the [`OperationBackend`] trait so the batch
//! orchestrator can be driven by a scripted backend in tests. The
//! production backend is [`OperationDispatcher`].

pub mod code_exec;
pub mod dir_create;
pub mod dispatcher;
pub mod file_write;
pub mod shell_exec;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::exec::SessionCommandResult;
use crate::types::{RuntimeKind, ShellKind};

pub use dispatcher::{OperationBackend, OperationContext, OperationDispatcher};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    FileWrite(FileWriteOp),
    DirCreate(DirCreateOp),
    ShellExec(ShellExecOp),
    CodeExec(CodeExecOp),
}

impl Operation {
    /// Per-operation working directory override.
    pub fn working_dir(&self) -> Option<&str> {
        match self {
            Operation::FileWrite(op) => op.working_dir.as_deref(),
            Operation::DirCreate(op) => op.working_dir.as_deref(),
            Operation::ShellExec(op) => op.working_dir.as_deref(),
            Operation::CodeExec(op) => op.working_dir.as_deref(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::FileWrite(_) => "file_write",
            Operation::DirCreate(_) => "dir_create",
            Operation::ShellExec(_) => "shell_exec",
            Operation::CodeExec(_) => "code_exec",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileWriteOp {
    pub files: Vec<FileSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileSpec {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirCreateOp {
    pub structure: DirTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

/// Directory name → children. `null` and `{}` both mean "no children".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct DirTree(pub BTreeMap<String, Option<DirTree>>);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellExecOp {
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExecOp {
    pub runtime: RuntimeKind,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OperationOutput {
    Text(String),
    Commands(Vec<SessionCommandResult>),
}

/// Outcome of one attempted operation. Never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation_index: usize,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OperationOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_working_dir: Option<String>,
}

impl OperationResult {
    pub fn success(index: usize, output: OperationOutput) -> Self {
        Self {
            operation_index: index,
            status: OperationStatus::Success,
            output: Some(output),
            error: None,
            final_working_dir: None,
        }
    }

    pub fn failure(index: usize, error: impl Into<String>) -> Self {
        Self {
            operation_index: index,
            status: OperationStatus::Error,
            output: None,
            error: Some(error.into()),
            final_working_dir: None,
        }
    }

    pub fn with_output(mut self, output: OperationOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_final_dir(mut self, dir: impl Into<String>) -> Self {
        let dir = dir.into();
        if !dir.is_empty() {
            self.final_working_dir = Some(dir);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == OperationStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operations_parse_from_tagged_json() {
        let ops: Vec<Operation> = serde_json::from_value(json!([
            { "type": "file_write", "files": [{ "path": "a.txt", "content": "hi" }] },
            { "type": "dir_create", "structure": { "src": { "lib": null }, "docs": {} }, "workingDir": "proj" },
            { "type": "shell_exec", "commands": ["ls"], "shell": "gitbash" },
            { "type": "code_exec", "runtime": "python", "code": "print(1)" }
        ]))
        .unwrap();

        assert_eq!(ops.len(), 4);
        assert_eq!(ops[1].working_dir(), Some("proj"));
        match &ops[2] {
            Operation::ShellExec(op) => assert_eq!(op.shell, Some(ShellKind::GitBash)),
            other => panic!("unexpected op {other:?}"),
        }
        match &ops[1] {
            Operation::DirCreate(op) => {
                assert_eq!(op.structure.0.len(), 2);
                assert_eq!(op.structure.0["src"].as_ref().unwrap().0["lib"], None);
            }
            other => panic!("unexpected op {other:?}"),
        }
        assert_eq!(ops[3].kind_name(), "code_exec");
    }

    #[test]
    fn unknown_operation_type_is_rejected() {
        let res: Result<Operation, _> =
            serde_json::from_value(json!({ "type": "rm_rf", "path": "/" }));
        assert!(res.is_err());
    }

    #[test]
    fn result_serialization_skips_absent_fields() {
        let ok = OperationResult::success(0, OperationOutput::Text("done".into()));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, json!({ "operationIndex": 0, "status": "success", "output": "done" }));

        let err = OperationResult::failure(3, "boom").with_final_dir("");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, json!({ "operationIndex": 3, "status": "error", "error": "boom" }));
    }
}
