// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::model::{RawConfigFile, ServerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading config file");
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks workspaces (absolute, unique, at most one default) and that
///   every numeric limit is usable.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let raw_config = load_from_path(&path)?;
    let config = ServerConfig::try_from(raw_config)?;
    info!(
        path = %path.as_ref().display(),
        workspaces = config.security.workspaces.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Create every workspace root that does not exist yet.
pub fn ensure_workspace_roots(config: &ServerConfig) -> Result<()> {
    for ws in &config.security.workspaces {
        if !ws.path.exists() {
            fs::create_dir_all(&ws.path)?;
            info!(workspace = %ws.id, path = %ws.path.display(), "created workspace root");
        }
    }
    Ok(())
}

/// Default config location: `Codeact.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Codeact.toml")
}
