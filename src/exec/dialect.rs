// src/exec/dialect.rs

//! Per-shell knowledge needed by the session protocol:
//! how to start a long-lived non-interactive session, how to suffix a
//! command so the shell prints a completion marker with the exit code, and
//! how to ask for (and clean up) the current directory.

use std::sync::LazyLock;

use regex::Regex;

use crate::exec::marker::Marker;
use crate::types::ShellKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Windows command interpreter.
    Cmd,
    PowerShell,
    /// bash / sh / zsh.
    Posix(PosixShell),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosixShell {
    Bash,
    Sh,
    Zsh,
}

impl From<ShellKind> for Dialect {
    fn from(kind: ShellKind) -> Self {
        match kind {
            ShellKind::Cmd => Dialect::Cmd,
            ShellKind::PowerShell => Dialect::PowerShell,
            ShellKind::GitBash | ShellKind::Bash => Dialect::Posix(PosixShell::Bash),
            ShellKind::Sh => Dialect::Posix(PosixShell::Sh),
            ShellKind::Zsh => Dialect::Posix(PosixShell::Zsh),
        }
    }
}

impl Dialect {
    /// Binary and flags for a session that stays alive reading stdin but
    /// skips banners, profiles and rc files.
    pub fn spawn_args(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Dialect::Cmd => ("cmd.exe", &["/Q", "/K", "prompt $P$G"]),
            Dialect::PowerShell => (
                "powershell.exe",
                &["-NoLogo", "-NoProfile", "-NonInteractive", "-Command", "-"],
            ),
            Dialect::Posix(PosixShell::Bash) => ("bash", &["--norc", "--noprofile"]),
            Dialect::Posix(PosixShell::Sh) => ("sh", &[]),
            Dialect::Posix(PosixShell::Zsh) => ("zsh", &["-f"]),
        }
    }

    /// Text written to the shell's stdin for `command`, including the
    /// trailing newline.
    pub fn wrap_command(&self, command: &str, marker: &Marker) -> String {
        let token = marker.token();
        match self {
            // `call` plus the caret forces %ERRORLEVEL% to expand after the
            // command ran, not when the line was parsed.
            Dialect::Cmd => {
                format!("({command}) & call echo {token}_EXITCODE_%^ERRORLEVEL%\r\n")
            }
            Dialect::PowerShell => format!(
                "$global:LASTEXITCODE = 0; try {{ {command}; $__ok = $?; \
                 $__code = if ($LASTEXITCODE) {{ $LASTEXITCODE }} elseif ($__ok) {{ 0 }} else {{ 1 }}; \
                 echo \"{token}_EXITCODE_$__code\" }} \
                 catch {{ echo \"{token}_EXITCODE_1_ERROR_$($_.Exception.Message)\" }}\r\n"
            ),
            // On its own line so a trailing comment in `command` cannot
            // swallow the marker.
            Dialect::Posix(_) => format!("{command}\necho \"{token}_EXITCODE_$?\"\n"),
        }
    }

    /// The dialect's native "print current directory" command.
    pub fn pwd_command(&self) -> &'static str {
        match self {
            Dialect::Cmd => "cd",
            Dialect::PowerShell => "Get-Location | Select-Object -ExpandProperty Path",
            Dialect::Posix(_) => "pwd",
        }
    }

    /// Strip prompt noise from the output of [`Dialect::pwd_command`].
    pub fn clean_pwd_output(&self, raw: &str) -> String {
        let output = raw.trim();
        match self {
            Dialect::Cmd => clean_cmd_pwd(output),
            Dialect::PowerShell => clean_powershell_pwd(output),
            Dialect::Posix(_) => clean_posix_pwd(output),
        }
    }
}

static CMD_AFTER_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*>(.*)$").expect("valid regex"));
static CMD_DRIVE_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]:\\[^>]*$").expect("valid regex"));
static PS_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PS\s+[^>]*>\s*(.*)$").expect("valid regex"));
static PS_LAST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.*)$").expect("valid regex"));
static POSIX_TRAILING_ABS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".*\s(/\S*)$").expect("valid regex"));
static POSIX_ANY_ABS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(/\S*)").expect("valid regex"));

/// `C:\work>C:\work\sub` → `C:\work\sub`.
fn clean_cmd_pwd(output: &str) -> String {
    if let Some(rest) = CMD_AFTER_PROMPT
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
    {
        return rest.to_string();
    }
    CMD_DRIVE_PATH
        .find(output)
        .map_or_else(|| output.to_string(), |m| m.as_str().to_string())
}

/// `PS C:\work> C:\work\sub` → `C:\work\sub`.
fn clean_powershell_pwd(output: &str) -> String {
    PS_PROMPT
        .captures(output)
        .or_else(|| PS_LAST_LINE.captures(output))
        .and_then(|c| c.get(1))
        .map_or_else(|| output.to_string(), |m| m.as_str().trim().to_string())
}

/// `user@host:~$ /home/user/sub` → `/home/user/sub`.
///
/// A line that is itself an absolute path is taken whole, spaces included.
fn clean_posix_pwd(output: &str) -> String {
    let last_line = output
        .lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or_default();
    if last_line.starts_with('/') {
        return last_line.to_string();
    }

    let candidate = POSIX_TRAILING_ABS
        .captures(output)
        .or_else(|| POSIX_ANY_ABS.captures(output))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    if let Some(path) = candidate.filter(|p| p.starts_with('/')) {
        return path.to_string();
    }

    match output.split_whitespace().last() {
        Some(last) if last.contains('/') => last.to_string(),
        _ => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gitbash_maps_to_bash() {
        let d = Dialect::from(ShellKind::GitBash);
        assert_eq!(d, Dialect::Posix(PosixShell::Bash));
        assert_eq!(d.spawn_args().0, "bash");
        assert_eq!(d.pwd_command(), "pwd");
    }

    #[test]
    fn posix_wrap_puts_marker_on_its_own_line() {
        let m = Marker::generate();
        let wrapped = Dialect::Posix(PosixShell::Bash).wrap_command("ls # list", &m);
        assert_eq!(
            wrapped,
            format!("ls # list\necho \"{}_EXITCODE_$?\"\n", m.token())
        );
    }

    #[test]
    fn powershell_wrap_has_catch_branch_with_error_payload() {
        let m = Marker::generate();
        let wrapped = Dialect::PowerShell.wrap_command("Get-Item nope", &m);
        assert!(wrapped.contains("try { Get-Item nope;"));
        assert!(wrapped.contains(&format!("{}_EXITCODE_1_ERROR_", m.token())));
    }

    #[test]
    fn cmd_pwd_takes_text_after_last_prompt() {
        let d = Dialect::Cmd;
        assert_eq!(d.clean_pwd_output("C:\\work>C:\\work\\sub\r\n"), "C:\\work\\sub");
        assert_eq!(d.clean_pwd_output("C:\\work\\sub"), "C:\\work\\sub");
        assert_eq!(
            d.clean_pwd_output("C:\\a>echo x\r\nC:\\a>C:\\a\\b\r\n"),
            "C:\\a\\b"
        );
    }

    #[test]
    fn powershell_pwd_strips_prompt() {
        let d = Dialect::PowerShell;
        assert_eq!(d.clean_pwd_output("PS C:\\work> C:\\work\\sub"), "C:\\work\\sub");
        assert_eq!(d.clean_pwd_output("C:\\work\\sub"), "C:\\work\\sub");
    }

    #[test]
    fn posix_pwd_takes_last_absolute_path() {
        let d = Dialect::Posix(PosixShell::Bash);
        assert_eq!(d.clean_pwd_output("/tmp/ws/sub\n"), "/tmp/ws/sub");
        assert_eq!(d.clean_pwd_output("user@host:~$ /home/user/sub"), "/home/user/sub");
        assert_eq!(d.clean_pwd_output("no path here"), "no path here");
    }

    #[test]
    fn posix_pwd_keeps_spaces_in_a_bare_path() {
        let d = Dialect::Posix(PosixShell::Bash);
        assert_eq!(d.clean_pwd_output("/tmp/ws/my dir\n"), "/tmp/ws/my dir");
        assert_eq!(d.clean_pwd_output("noise\n/tmp/a b/c d"), "/tmp/a b/c d");
        assert_eq!(d.clean_pwd_output("$ /home/user/sub"), "/home/user/sub");
    }
}
