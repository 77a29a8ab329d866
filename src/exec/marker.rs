// src/exec/marker.rs

//! Command-boundary markers for session shells.
//!
//! After each command the shell itself prints
//! `<marker>_EXITCODE_<digits>` (optionally followed by
//! `_ERROR_<message>`), so the end of a command and its exit status can be
//! recovered from an otherwise unframed stdout stream.
//!
//! Known limitation: control and data share one stream. A command that
//! prints a marker line carrying the *current* token would be mistaken for
//! completion. The token carries 128 random bits plus a timestamp, so this
//! only happens on purpose.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

const MARKER_PREFIX: &str = "SHELL_MARKER_";

/// Matches one complete marker line. Requiring the trailing newline keeps a
/// chunk boundary inside the exit code from being read as a shorter code.
static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<token>SHELL_MARKER_[0-9a-f]{32}_[0-9]{4}-[0-9]{2}-[0-9]{2}_[0-9]{2}-[0-9]{2}-[0-9]{2})_EXITCODE_(?P<code>[0-9]+)(?:_ERROR_(?P<error>[^\r\n]*))?\r?\n",
    )
    .expect("marker pattern is a valid regex")
});

/// A unique end-of-command token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    token: String,
}

/// What a marker line tells us about the command that preceded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Everything before the marker, trimmed and without carriage returns.
    pub output: String,
    pub exit_code: i32,
    /// Error payload embedded by the shell (PowerShell catch block).
    pub error: Option<String>,
}

impl Marker {
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
        Self {
            token: format!("{MARKER_PREFIX}{random}_{timestamp}"),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Find this marker's completion line in `buffer`.
    ///
    /// Marker lines carrying other tokens (late output of an earlier
    /// command) are skipped.
    pub fn scan(&self, buffer: &str) -> Option<MarkerMatch> {
        let caps = MARKER_LINE
            .captures_iter(buffer)
            .find(|caps| &caps["token"] == self.token)?;

        let start = caps.get(0).map_or(0, |m| m.start());
        let output = buffer[..start].replace('\r', "").trim().to_string();
        let exit_code = caps["code"].parse::<i32>().unwrap_or(-1);
        let error = caps
            .name("error")
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty());

        Some(MarkerMatch {
            output,
            exit_code,
            error,
        })
    }
}
