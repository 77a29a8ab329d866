// src/config/mod.rs

//! Configuration loading and validation for codeact.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate workspaces and limits (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, ensure_workspace_roots, load_and_validate, load_from_path};
pub use model::{
    RawConfigFile, RetentionSection, RuntimeConfig, RuntimesSection, SecuritySection,
    ServerConfig, ShellSection, WorkspaceConfig,
};
