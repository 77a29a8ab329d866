// src/ops/code_exec.rs

//! One-shot interpreted code.
//!
//! The source is written to `temp_<uuid><ext>` in the operation directory,
//! run with the configured interpreter, and removed afterwards whatever the
//! outcome.

use tracing::warn;
use uuid::Uuid;

use crate::config::RuntimesSection;
use crate::exec::{ProcessKind, ProcessRunner, ProcessSpec};
use crate::fs::FileSystem;
use crate::ops::{CodeExecOp, OperationContext, OperationOutput, OperationResult};

const NO_OUTPUT: &str = "Code executed successfully (no output)";

pub async fn execute(
    fs: &dyn FileSystem,
    runner: &ProcessRunner,
    runtimes: &RuntimesSection,
    op: &CodeExecOp,
    ctx: &OperationContext<'_>,
) -> OperationResult {
    let runtime = runtimes.get(op.runtime);
    if !runtime.enabled {
        return OperationResult::failure(
            ctx.index,
            format!("Runtime {} is not enabled", op.runtime),
        );
    }

    let file_name = format!("temp_{}{}", Uuid::new_v4(), op.runtime.file_extension());
    let script = ctx.working_dir.join(&file_name);

    if let Err(e) = fs.write(&script, op.code.as_bytes()) {
        return OperationResult::failure(
            ctx.index,
            format!("Failed to write temporary source file: {e:#}"),
        );
    }

    let spec = ProcessSpec {
        program: runtime.effective_command(op.runtime).to_string(),
        args: vec![script.to_string_lossy().into_owned()],
        cwd: ctx.working_dir.to_path_buf(),
        timeout: runtime.timeout(),
        kind: ProcessKind::Code,
    };
    let outcome = runner.run(&spec, ctx.cancel, ctx.observer).await;

    if let Err(e) = fs.remove_file(&script) {
        warn!(
            batch_id = %ctx.batch_id,
            file = %script.display(),
            error = %e,
            "failed to remove temporary source file"
        );
    }

    match outcome {
        Ok(stdout) => {
            let text = stdout.trim();
            let text = if text.is_empty() { NO_OUTPUT } else { text };
            OperationResult::success(ctx.index, OperationOutput::Text(text.to_string()))
        }
        Err(e) => OperationResult::failure(ctx.index, e.to_string()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::NoopObserver;
    use crate::fs::RealFileSystem;
    use crate::types::RuntimeKind;
    use tokio_util::sync::CancellationToken;

    fn sh_python() -> RuntimesSection {
        let mut runtimes = RuntimesSection::default();
        let python = runtimes.get_mut(RuntimeKind::Python);
        python.enabled = true;
        // Any interpreter that takes a script path works for these tests.
        python.command = Some("sh".into());
        runtimes
    }

    fn leftover_temp_files(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("temp_"))
            .count()
    }

    #[tokio::test]
    async fn runs_script_and_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let ctx = OperationContext {
            batch_id: "b",
            index: 0,
            working_dir: dir.path(),
            workspace_root: dir.path(),
            cancel: &cancel,
            observer: &NoopObserver,
        };
        let op = CodeExecOp {
            runtime: RuntimeKind::Python,
            code: "echo hi from script\n".into(),
            working_dir: None,
        };

        let result = execute(&RealFileSystem, &ProcessRunner::new(), &sh_python(), &op, &ctx).await;

        assert_eq!(result.output, Some(OperationOutput::Text("hi from script".into())));
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn empty_output_and_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let ctx = OperationContext {
            batch_id: "b",
            index: 4,
            working_dir: dir.path(),
            workspace_root: dir.path(),
            cancel: &cancel,
            observer: &NoopObserver,
        };
        let runtimes = sh_python();
        let runner = ProcessRunner::new();

        let quiet = CodeExecOp {
            runtime: RuntimeKind::Python,
            code: "true\n".into(),
            working_dir: None,
        };
        let result = execute(&RealFileSystem, &runner, &runtimes, &quiet, &ctx).await;
        assert_eq!(result.output, Some(OperationOutput::Text(NO_OUTPUT.into())));

        let failing = CodeExecOp {
            runtime: RuntimeKind::Python,
            code: "echo bad >&2\nexit 7\n".into(),
            working_dir: None,
        };
        let result = execute(&RealFileSystem, &runner, &runtimes, &failing, &ctx).await;
        assert!(result.is_error());
        let error = result.error.unwrap();
        assert!(error.contains("exit code 7"), "{error}");
        assert!(error.contains("bad"), "{error}");
        assert_eq!(leftover_temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn disabled_runtime_is_rejected() {
        let cancel = CancellationToken::new();
        let dir = std::env::temp_dir();
        let ctx = OperationContext {
            batch_id: "b",
            index: 0,
            working_dir: &dir,
            workspace_root: &dir,
            cancel: &cancel,
            observer: &NoopObserver,
        };
        let op = CodeExecOp {
            runtime: RuntimeKind::Node,
            code: "console.log(1)".into(),
            working_dir: None,
        };
        let result = execute(
            &RealFileSystem,
            &ProcessRunner::new(),
            &RuntimesSection::default(),
            &op,
            &ctx,
        )
        .await;
        assert!(result.error.unwrap().contains("not enabled"));
    }
}
