#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use codeact::batch::BatchRequest;
use codeact::config::{RawConfigFile, ServerConfig, WorkspaceConfig};
use codeact::ops::{CodeExecOp, DirCreateOp, FileSpec, FileWriteOp, Operation, ShellExecOp};
use codeact::types::{RuntimeKind, ShellKind};
use tempfile::TempDir;

/// A validated config whose workspaces live in temporary directories.
///
/// The directories are removed when this value is dropped.
pub struct TestConfig {
    pub config: Arc<ServerConfig>,
    dirs: Vec<TempDir>,
}

impl TestConfig {
    /// Root of the default workspace.
    pub fn root(&self) -> &Path {
        self.config.default_workspace().root()
    }

    pub fn workspace_root(&self, id: &str) -> PathBuf {
        self.config
            .workspace(id)
            .expect("unknown workspace in test")
            .path
            .clone()
    }
}

/// Builder for `ServerConfig` to simplify test setup.
///
/// Starts with one default workspace `main` in a fresh temp dir.
pub struct ConfigBuilder {
    raw: RawConfigFile,
    dirs: Vec<TempDir>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            raw: RawConfigFile::default(),
            dirs: Vec::new(),
        };
        builder.push_workspace("main", true);
        builder
    }

    pub fn with_workspace(mut self, id: &str) -> Self {
        self.push_workspace(id, false);
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.raw.security.max_batch_size = n;
        self
    }

    pub fn max_concurrent_batches(mut self, n: usize) -> Self {
        self.raw.security.max_concurrent_batches = n;
        self
    }

    /// Enable `kind`, running scripts with `command`.
    pub fn with_runtime(mut self, kind: RuntimeKind, command: &str) -> Self {
        let rt = self.raw.runtimes.get_mut(kind);
        rt.enabled = true;
        rt.command = Some(command.to_string());
        self
    }

    pub fn session_timeout_secs(mut self, secs: u64) -> Self {
        self.raw.shell.session_timeout_secs = secs;
        self
    }

    pub fn default_shell(mut self, shell: ShellKind) -> Self {
        self.raw.shell.default_shell = Some(shell);
        self
    }

    pub fn max_batch_history(mut self, n: usize) -> Self {
        self.raw.retention.max_batch_history = n;
        self
    }

    pub fn max_age_secs(mut self, secs: u64) -> Self {
        self.raw.retention.max_age_secs = Some(secs);
        self
    }

    pub fn build(self) -> TestConfig {
        let config =
            ServerConfig::try_from(self.raw).expect("Failed to build valid config from builder");
        TestConfig {
            config: Arc::new(config),
            dirs: self.dirs,
        }
    }

    fn push_workspace(&mut self, id: &str, default: bool) {
        let dir = tempfile::tempdir().expect("create temp workspace");
        self.raw.security.workspaces.push(WorkspaceConfig {
            id: id.to_string(),
            path: dir.path().to_path_buf(),
            default,
        });
        self.dirs.push(dir);
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `BatchRequest`. Synchronous unless told otherwise.
pub struct BatchRequestBuilder {
    request: BatchRequest,
}

impl BatchRequestBuilder {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self {
            request: BatchRequest {
                operations,
                sync: true,
                workspace: None,
                working_dir: None,
            },
        }
    }

    pub fn asynchronous(mut self) -> Self {
        self.request.sync = false;
        self
    }

    pub fn workspace(mut self, id: &str) -> Self {
        self.request.workspace = Some(id.to_string());
        self
    }

    pub fn working_dir(mut self, dir: &str) -> Self {
        self.request.working_dir = Some(dir.to_string());
        self
    }

    pub fn build(self) -> BatchRequest {
        self.request
    }
}

pub fn write_file(path: &str, content: &str) -> Operation {
    Operation::FileWrite(FileWriteOp {
        files: vec![FileSpec {
            path: path.to_string(),
            content: content.to_string(),
        }],
        working_dir: None,
    })
}

pub fn create_dirs(structure: serde_json::Value) -> Operation {
    Operation::DirCreate(DirCreateOp {
        structure: serde_json::from_value(structure).expect("valid dir tree"),
        working_dir: None,
    })
}

pub fn shell(commands: &[&str]) -> Operation {
    Operation::ShellExec(ShellExecOp {
        commands: commands.iter().map(|c| c.to_string()).collect(),
        shell: None,
        working_dir: None,
    })
}

pub fn code(runtime: RuntimeKind, source: &str) -> Operation {
    Operation::CodeExec(CodeExecOp {
        runtime,
        code: source.to_string(),
        working_dir: None,
    })
}

/// Set the per-operation working directory override.
pub fn in_dir(mut op: Operation, dir: &str) -> Operation {
    let slot = match &mut op {
        Operation::FileWrite(o) => &mut o.working_dir,
        Operation::DirCreate(o) => &mut o.working_dir,
        Operation::ShellExec(o) => &mut o.working_dir,
        Operation::CodeExec(o) => &mut o.working_dir,
    };
    *slot = Some(dir.to_string());
    op
}
