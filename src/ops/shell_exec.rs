// src/ops/shell_exec.rs

use crate::config::ShellSection;
use crate::exec::SessionShell;
use crate::ops::{OperationContext, OperationOutput, OperationResult, ShellExecOp};

/// Run the command sequence of `op` in one session shell started in the
/// operation directory.
///
/// On failure the commands that did complete are still reported as the
/// output, next to the error.
pub async fn execute(
    shell_cfg: &ShellSection,
    op: &ShellExecOp,
    ctx: &OperationContext<'_>,
) -> OperationResult {
    let kind = op.shell.unwrap_or_else(|| shell_cfg.effective_default_shell());
    let mut session = SessionShell::new(kind, ctx.working_dir, shell_cfg.session_timeout());

    let outcome = session
        .execute_sequence(&op.commands, ctx.cancel, ctx.observer)
        .await;

    if outcome.success {
        OperationResult::success(ctx.index, OperationOutput::Commands(outcome.commands))
            .with_final_dir(outcome.final_working_directory)
    } else {
        let error = outcome
            .error
            .unwrap_or_else(|| "Shell execution failed".to_string());
        OperationResult::failure(ctx.index, error)
            .with_output(OperationOutput::Commands(outcome.commands))
    }
}
