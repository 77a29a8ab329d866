use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Shell requested by a `shell_exec` operation.
///
/// - `Cmd` / `PowerShell`: the two Windows dialects.
/// - `GitBash`: bash (Git Bash on Windows, plain bash elsewhere).
/// - `Bash` / `Sh` / `Zsh`: other POSIX-family shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Cmd,
    PowerShell,
    GitBash,
    Bash,
    Sh,
    Zsh,
}

impl ShellKind {
    /// Platform default used when an operation does not name a shell.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            ShellKind::Cmd
        } else {
            ShellKind::GitBash
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Cmd => "cmd",
            ShellKind::PowerShell => "powershell",
            ShellKind::GitBash => "gitbash",
            ShellKind::Bash => "bash",
            ShellKind::Sh => "sh",
            ShellKind::Zsh => "zsh",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cmd" => Ok(ShellKind::Cmd),
            "powershell" => Ok(ShellKind::PowerShell),
            "gitbash" => Ok(ShellKind::GitBash),
            "bash" => Ok(ShellKind::Bash),
            "sh" => Ok(ShellKind::Sh),
            "zsh" => Ok(ShellKind::Zsh),
            other => Err(format!(
                "unsupported shell: {other} (expected cmd, powershell, gitbash, bash, sh or zsh)"
            )),
        }
    }
}

/// Interpreter used by a `code_exec` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Node,
    Php,
    Python,
}

impl RuntimeKind {
    pub const ALL: [RuntimeKind; 3] = [RuntimeKind::Node, RuntimeKind::Php, RuntimeKind::Python];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Php => "php",
            RuntimeKind::Python => "python",
        }
    }

    /// Extension of the temporary source file handed to the interpreter.
    pub fn file_extension(&self) -> &'static str {
        match self {
            RuntimeKind::Node => ".js",
            RuntimeKind::Php => ".php",
            RuntimeKind::Python => ".py",
        }
    }

    /// Interpreter binary used when the config does not override it.
    pub fn default_command(&self) -> &'static str {
        match self {
            RuntimeKind::Node => "node",
            RuntimeKind::Php => "php",
            RuntimeKind::Python => "python",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "node" => Ok(RuntimeKind::Node),
            "php" => Ok(RuntimeKind::Php),
            "python" => Ok(RuntimeKind::Python),
            other => Err(format!(
                "unsupported runtime: {other} (expected node, php or python)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_kind_parses_wire_names() {
        assert_eq!("gitbash".parse::<ShellKind>(), Ok(ShellKind::GitBash));
        assert_eq!(" PowerShell ".parse::<ShellKind>(), Ok(ShellKind::PowerShell));
        assert!("fish".parse::<ShellKind>().is_err());
    }

    #[test]
    fn runtime_kind_deserializes_lowercase() {
        let rt: RuntimeKind = serde_json::from_str("\"python\"").unwrap();
        assert_eq!(rt, RuntimeKind::Python);
        assert_eq!(rt.file_extension(), ".py");
        assert!(serde_json::from_str::<RuntimeKind>("\"ruby\"").is_err());
    }
}
