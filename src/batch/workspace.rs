// src/batch/workspace.rs

//! Working-directory resolution against an allow-listed root.
//!
//! Paths are normalized lexically (`.` and `..` folded away) before the
//! containment check. Symlinks are not resolved, so a link inside the root
//! that points outside it is not caught here.

use std::path::{Path, PathBuf};

use path_clean::PathClean;

use crate::errors::{CodeactError, Result};

/// Resolve `requested` against `base`.
///
/// Absolute paths are taken as-is; relative ones are joined to `base`.
/// `None` (or an empty string) yields `base` itself.
pub fn resolve(base: &Path, requested: Option<&str>) -> PathBuf {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(req) => {
            let req = Path::new(req);
            if req.is_absolute() {
                req.clean()
            } else {
                base.join(req).clean()
            }
        }
        None => base.clean(),
    }
}

/// Check that `path` lies inside `root` (or is `root`).
pub fn ensure_within(root: &Path, path: &Path) -> Result<()> {
    let root = root.clean();
    let path = path.clean();
    if path.starts_with(&root) {
        Ok(())
    } else {
        Err(CodeactError::PathNotAllowed(format!(
            "'{}' is outside workspace '{}'",
            path.display(),
            root.display()
        )))
    }
}

/// [`resolve`] followed by [`ensure_within`].
pub fn resolve_within(root: &Path, base: &Path, requested: Option<&str>) -> Result<PathBuf> {
    let resolved = resolve(base, requested);
    ensure_within(root, &resolved)?;
    Ok(resolved)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_the_base() {
        let base = Path::new("/ws/root");
        assert_eq!(resolve(base, Some("sub/dir")), PathBuf::from("/ws/root/sub/dir"));
        assert_eq!(resolve(base, Some("./a/../b")), PathBuf::from("/ws/root/b"));
        assert_eq!(resolve(base, None), PathBuf::from("/ws/root"));
        assert_eq!(resolve(base, Some("  ")), PathBuf::from("/ws/root"));
    }

    #[test]
    fn absolute_paths_ignore_the_base() {
        assert_eq!(
            resolve(Path::new("/ws/root"), Some("/ws/other")),
            PathBuf::from("/ws/other")
        );
    }

    #[test]
    fn escapes_are_rejected() {
        let root = Path::new("/ws/root");
        assert!(resolve_within(root, root, Some("../../etc")).is_err());
        assert!(resolve_within(root, root, Some("/etc")).is_err());
        assert!(resolve_within(root, root, Some("a/../../root2")).is_err());
        assert!(resolve_within(root, root, Some("a/../b")).is_ok());
        assert!(resolve_within(root, root, None).is_ok());
    }

    #[test]
    fn prefix_sibling_is_not_inside() {
        // `/ws/rootx` shares a string prefix with `/ws/root` but is a sibling.
        let err = ensure_within(Path::new("/ws/root"), Path::new("/ws/rootx")).unwrap_err();
        assert!(matches!(err, CodeactError::PathNotAllowed(_)));
    }
}
