// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{RawConfigFile, ServerConfig};
use crate::errors::{CodeactError, Result};
use crate::types::RuntimeKind;

impl TryFrom<RawConfigFile> for ServerConfig {
    type Error = CodeactError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ServerConfig::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_workspaces(cfg)?;
    validate_limits(cfg)?;
    validate_runtimes(cfg)?;
    Ok(())
}

fn validate_workspaces(cfg: &RawConfigFile) -> Result<()> {
    let workspaces = &cfg.security.workspaces;
    if workspaces.is_empty() {
        return Err(CodeactError::ConfigError(
            "config must contain at least one [[security.workspaces]] entry".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for ws in workspaces {
        if ws.id.trim().is_empty() {
            return Err(CodeactError::ConfigError(
                "workspace id must not be empty".to_string(),
            ));
        }
        if !seen.insert(ws.id.as_str()) {
            return Err(CodeactError::ConfigError(format!(
                "duplicate workspace id '{}'",
                ws.id
            )));
        }
        if !ws.path.is_absolute() {
            return Err(CodeactError::ConfigError(format!(
                "workspace '{}' path must be absolute: {}",
                ws.id,
                ws.path.display()
            )));
        }
    }

    let defaults = workspaces.iter().filter(|ws| ws.default).count();
    if defaults > 1 {
        return Err(CodeactError::ConfigError(format!(
            "at most one workspace may be marked default (got {defaults})"
        )));
    }

    Ok(())
}

fn validate_limits(cfg: &RawConfigFile) -> Result<()> {
    let checks = [
        ("[security].max_batch_size", cfg.security.max_batch_size as u64),
        (
            "[security].max_concurrent_batches",
            cfg.security.max_concurrent_batches as u64,
        ),
        ("[shell].session_timeout_secs", cfg.shell.session_timeout_secs),
        (
            "[retention].cleanup_interval_secs",
            cfg.retention.cleanup_interval_secs,
        ),
        (
            "[retention].max_batch_history",
            cfg.retention.max_batch_history as u64,
        ),
    ];

    for (name, value) in checks {
        if value == 0 {
            return Err(CodeactError::ConfigError(format!(
                "{name} must be >= 1 (got 0)"
            )));
        }
    }

    if cfg.retention.max_age_secs == Some(0) {
        return Err(CodeactError::ConfigError(
            "[retention].max_age_secs must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(())
}

fn validate_runtimes(cfg: &RawConfigFile) -> Result<()> {
    for kind in RuntimeKind::ALL {
        let rt = cfg.runtimes.get(kind);
        if rt.timeout_secs == 0 {
            return Err(CodeactError::ConfigError(format!(
                "[runtimes.{kind}].timeout_secs must be >= 1 (got 0)"
            )));
        }
        if rt.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(CodeactError::ConfigError(format!(
                "[runtimes.{kind}].command must not be empty"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::WorkspaceConfig;
    use std::path::PathBuf;

    fn workspace(id: &str, path: &str, default: bool) -> WorkspaceConfig {
        WorkspaceConfig {
            id: id.to_string(),
            path: PathBuf::from(path),
            default,
        }
    }

    fn raw_with(workspaces: Vec<WorkspaceConfig>) -> RawConfigFile {
        let mut raw = RawConfigFile::default();
        raw.security.workspaces = workspaces;
        raw
    }

    #[test]
    fn missing_workspaces_is_rejected() {
        let err = ServerConfig::try_from(RawConfigFile::default()).unwrap_err();
        assert!(matches!(err, CodeactError::ConfigError(msg) if msg.contains("at least one")));
    }

    #[cfg(unix)]
    #[test]
    fn default_workspace_falls_back_to_first() {
        let cfg = ServerConfig::try_from(raw_with(vec![
            workspace("a", "/tmp/a", false),
            workspace("b", "/tmp/b", false),
        ]))
        .unwrap();
        assert_eq!(cfg.default_workspace().id, "a");
    }

    #[cfg(unix)]
    #[test]
    fn duplicate_ids_and_multiple_defaults_are_rejected() {
        let dup = raw_with(vec![
            workspace("a", "/tmp/a", false),
            workspace("a", "/tmp/b", false),
        ]);
        assert!(ServerConfig::try_from(dup).is_err());

        let two_defaults = raw_with(vec![
            workspace("a", "/tmp/a", true),
            workspace("b", "/tmp/b", true),
        ]);
        assert!(ServerConfig::try_from(two_defaults).is_err());
    }

    #[test]
    fn relative_workspace_path_is_rejected() {
        let err = ServerConfig::try_from(raw_with(vec![workspace("a", "rel/dir", true)]))
            .unwrap_err();
        assert!(matches!(err, CodeactError::ConfigError(msg) if msg.contains("absolute")));
    }

    #[cfg(unix)]
    #[test]
    fn zero_limits_are_rejected() {
        let mut raw = raw_with(vec![workspace("a", "/tmp/a", true)]);
        raw.security.max_concurrent_batches = 0;
        let err = ServerConfig::try_from(raw).unwrap_err();
        assert!(matches!(err, CodeactError::ConfigError(msg) if msg.contains("max_concurrent_batches")));
    }
}
