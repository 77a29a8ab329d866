// src/ops/dir_create.rs

use std::path::PathBuf;

use crate::batch::workspace;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::ops::{DirCreateOp, DirTree, OperationContext, OperationOutput, OperationResult};

/// Create the directory tree of `op` under the operation directory.
///
/// The whole tree is validated before the first directory is created.
pub fn execute(fs: &dyn FileSystem, op: &DirCreateOp, ctx: &OperationContext<'_>) -> OperationResult {
    let mut planned = Vec::new();
    if let Err(e) = plan(ctx, &op.structure, "", &mut planned) {
        return OperationResult::failure(ctx.index, e.to_string());
    }

    for (path, relative) in &planned {
        if let Err(e) = fs.create_dir_all(path) {
            return OperationResult::failure(
                ctx.index,
                format!("Failed to create directory '{relative}': {e:#}"),
            );
        }
    }

    let names: Vec<&str> = planned.iter().map(|(_, rel)| rel.as_str()).collect();
    OperationResult::success(
        ctx.index,
        OperationOutput::Text(format!(
            "Created {} directories: {}",
            names.len(),
            names.join(", ")
        )),
    )
}

/// Depth-first walk producing `(absolute, relative)` pairs, parents first.
fn plan(
    ctx: &OperationContext<'_>,
    tree: &DirTree,
    prefix: &str,
    out: &mut Vec<(PathBuf, String)>,
) -> Result<()> {
    for (name, children) in &tree.0 {
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let path = workspace::resolve_within(ctx.working_dir, ctx.working_dir, Some(&relative))?;
        out.push((path, relative.clone()));
        if let Some(children) = children {
            plan(ctx, children, &relative, out)?;
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::NoopObserver;
    use crate::fs::mock::MockFileSystem;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    fn tree(json: serde_json::Value) -> DirCreateOp {
        DirCreateOp {
            structure: serde_json::from_value(json).unwrap(),
            working_dir: None,
        }
    }

    #[test]
    fn creates_nested_tree_and_lists_relative_paths() {
        let fs = MockFileSystem::new();
        let cancel = CancellationToken::new();
        let dir = Path::new("/ws");
        let ctx = OperationContext {
            batch_id: "b",
            index: 0,
            working_dir: dir,
            workspace_root: dir,
            cancel: &cancel,
            observer: &NoopObserver,
        };

        let result = execute(
            &fs,
            &tree(serde_json::json!({ "src": { "bin": null, "lib": {} }, "docs": null })),
            &ctx,
        );

        assert_eq!(
            result.output,
            Some(OperationOutput::Text(
                "Created 4 directories: docs, src, src/bin, src/lib".into()
            ))
        );
        assert!(fs.is_dir(Path::new("/ws/src/lib")));
    }

    #[test]
    fn escaping_name_creates_nothing() {
        let fs = MockFileSystem::new();
        let cancel = CancellationToken::new();
        let dir = Path::new("/ws/proj");
        let ctx = OperationContext {
            batch_id: "b",
            index: 1,
            working_dir: dir,
            workspace_root: dir,
            cancel: &cancel,
            observer: &NoopObserver,
        };

        let result = execute(&fs, &tree(serde_json::json!({ "a": { "../../x": null } })), &ctx);

        assert!(result.is_error());
        assert!(fs.mutations().is_empty());
    }
}
