// src/ops/file_write.rs

use crate::batch::workspace;
use crate::fs::FileSystem;
use crate::ops::{FileWriteOp, OperationContext, OperationOutput, OperationResult};

/// Write every file of `op` under the operation directory.
///
/// All target paths are checked before anything is written.
pub fn execute(fs: &dyn FileSystem, op: &FileWriteOp, ctx: &OperationContext<'_>) -> OperationResult {
    let mut targets = Vec::with_capacity(op.files.len());
    for file in &op.files {
        match workspace::resolve_within(ctx.working_dir, ctx.working_dir, Some(&file.path)) {
            Ok(path) if path != ctx.working_dir => targets.push((path, file)),
            Ok(_) => {
                return OperationResult::failure(
                    ctx.index,
                    format!("Invalid file path '{}'", file.path),
                );
            }
            Err(e) => return OperationResult::failure(ctx.index, e.to_string()),
        }
    }

    for (path, file) in &targets {
        if let Err(e) = fs.write(path, file.content.as_bytes()) {
            return OperationResult::failure(
                ctx.index,
                format!("Failed to write file '{}': {e:#}", file.path),
            );
        }
    }

    OperationResult::success(
        ctx.index,
        OperationOutput::Text(format!("Successfully written {} files", targets.len())),
    )
}
