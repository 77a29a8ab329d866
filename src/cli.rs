// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `codeact`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "codeact",
    version,
    about = "Run batches of file, shell and code operations inside sandboxed workspaces.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Codeact.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Codeact.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CODEACT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print it, and exit.
    #[arg(long)]
    pub check: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_config() {
        let args = CliArgs::try_parse_from(["codeact"]).unwrap();
        assert_eq!(std::path::PathBuf::from(&args.config), crate::config::default_config_path());
        assert!(!args.check);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn flags_parse() {
        let args = CliArgs::try_parse_from([
            "codeact",
            "--config",
            "conf/dev.toml",
            "--log-level",
            "debug",
            "--check",
        ])
        .unwrap();
        assert_eq!(args.config, "conf/dev.toml");
        assert!(args.check);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
