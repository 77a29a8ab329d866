// src/config/model.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{RuntimeKind, ShellKind};

/// Configuration exactly as read from TOML, before semantic validation.
///
/// ```toml
/// [security]
/// max_batch_size = 50
/// max_concurrent_batches = 5
///
/// [[security.workspaces]]
/// id = "main"
/// path = "/srv/codeact/main"
/// default = true
///
/// [runtimes.python]
/// enabled = true
/// command = "python3"
///
/// [shell]
/// session_timeout_secs = 30
///
/// [retention]
/// cleanup_interval_secs = 3600
/// max_batch_history = 1000
/// ```
///
/// All sections are optional apart from at least one workspace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub security: SecuritySection,

    #[serde(default)]
    pub runtimes: RuntimesSection,

    #[serde(default)]
    pub shell: ShellSection,

    #[serde(default)]
    pub retention: RetentionSection,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`
/// (see `config::validate`).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub security: SecuritySection,
    pub runtimes: RuntimesSection,
    pub shell: ShellSection,
    pub retention: RetentionSection,
}

impl ServerConfig {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            security: raw.security,
            runtimes: raw.runtimes,
            shell: raw.shell,
            retention: raw.retention,
        }
    }

    /// The workspace marked `default = true`, or the first one.
    pub fn default_workspace(&self) -> &WorkspaceConfig {
        self.security
            .workspaces
            .iter()
            .find(|ws| ws.default)
            .unwrap_or(&self.security.workspaces[0])
    }

    pub fn workspace(&self, id: &str) -> Option<&WorkspaceConfig> {
        self.security.workspaces.iter().find(|ws| ws.id == id)
    }

    pub fn runtime(&self, kind: RuntimeKind) -> &RuntimeConfig {
        self.runtimes.get(kind)
    }
}

/// `[security]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SecuritySection {
    /// Upper bound on operations per batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Upper bound on batches that are queued or running at the same time.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    /// Allow-listed workspace roots. Every path a batch touches must resolve
    /// inside one of these.
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,
}

fn default_max_batch_size() -> usize {
    50
}

fn default_max_concurrent_batches() -> usize {
    5
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrent_batches: default_max_concurrent_batches(),
            workspaces: Vec::new(),
        }
    }
}

/// `[[security.workspaces]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub default: bool,
}

impl WorkspaceConfig {
    pub fn root(&self) -> &Path {
        &self.path
    }
}

/// `[runtimes.<name>]` sections.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimesSection {
    #[serde(default)]
    pub node: RuntimeConfig,
    #[serde(default)]
    pub php: RuntimeConfig,
    #[serde(default)]
    pub python: RuntimeConfig,
}

impl RuntimesSection {
    pub fn get(&self, kind: RuntimeKind) -> &RuntimeConfig {
        match kind {
            RuntimeKind::Node => &self.node,
            RuntimeKind::Php => &self.php,
            RuntimeKind::Python => &self.python,
        }
    }

    pub fn get_mut(&mut self, kind: RuntimeKind) -> &mut RuntimeConfig {
        match kind {
            RuntimeKind::Node => &mut self.node,
            RuntimeKind::Php => &mut self.php,
            RuntimeKind::Python => &mut self.python,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Runtimes are opt-in.
    #[serde(default)]
    pub enabled: bool,

    /// Interpreter binary; falls back to the runtime's usual name.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_runtime_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_runtime_timeout_secs() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: None,
            timeout_secs: default_runtime_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    pub fn effective_command(&self, kind: RuntimeKind) -> &str {
        self.command
            .as_deref()
            .unwrap_or_else(|| kind.default_command())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[shell]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ShellSection {
    /// Budget for one whole `shell_exec` command sequence.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    /// Shell used when an operation omits `shell`.
    #[serde(default)]
    pub default_shell: Option<ShellKind>,
}

fn default_session_timeout_secs() -> u64 {
    30
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout_secs(),
            default_shell: None,
        }
    }
}

impl ShellSection {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn effective_default_shell(&self) -> ShellKind {
        self.default_shell.unwrap_or_else(ShellKind::platform_default)
    }
}

/// `[retention]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    /// How often the retention sweep runs.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Age after which terminal batches are evicted. Defaults to twice the
    /// cleanup interval.
    #[serde(default)]
    pub max_age_secs: Option<u64>,

    /// Registry size above which the oldest terminal batches are evicted.
    #[serde(default = "default_max_batch_history")]
    pub max_batch_history: usize,
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

fn default_max_batch_history() -> usize {
    1000
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval_secs(),
            max_age_secs: None,
            max_batch_history: default_max_batch_history(),
        }
    }
}

impl RetentionSection {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(
            self.max_age_secs
                .unwrap_or(self.cleanup_interval_secs.saturating_mul(2)),
        )
    }
}
