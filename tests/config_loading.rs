use std::io::Write;

use codeact::config::{ensure_workspace_roots, load_and_validate};
use codeact::errors::CodeactError;
use codeact::types::{RuntimeKind, ShellKind};

fn write_config(body: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(body.as_bytes()).unwrap();
    file
}

#[test]
fn full_config_loads_with_defaults_filled_in() {
    let root = tempfile::tempdir().unwrap();
    let ws = root.path().join("main");
    let file = write_config(&format!(
        r#"
[security]
max_batch_size = 10

[[security.workspaces]]
id = "main"
path = {ws:?}
default = true

[[security.workspaces]]
id = "other"
path = {other:?}

[runtimes.python]
enabled = true
command = "python3"
timeout_secs = 5

[shell]
default_shell = "bash"

[retention]
cleanup_interval_secs = 60
"#,
        ws = ws.display().to_string(),
        other = root.path().join("other").display().to_string(),
    ));

    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.security.max_batch_size, 10);
    assert_eq!(cfg.security.max_concurrent_batches, 5);
    assert_eq!(cfg.default_workspace().id, "main");
    assert!(cfg.runtime(RuntimeKind::Python).enabled);
    assert_eq!(cfg.runtime(RuntimeKind::Python).effective_command(RuntimeKind::Python), "python3");
    assert!(!cfg.runtime(RuntimeKind::Node).enabled);
    assert_eq!(cfg.shell.effective_default_shell(), ShellKind::Bash);
    assert_eq!(cfg.shell.session_timeout_secs, 30);
    assert_eq!(cfg.retention.max_age().as_secs(), 120);
    assert_eq!(cfg.retention.max_batch_history, 1000);

    ensure_workspace_roots(&cfg).unwrap();
    assert!(ws.is_dir());
    assert!(root.path().join("other").is_dir());
}

#[test]
fn malformed_toml_is_a_toml_error() {
    let file = write_config("[security\nmax_batch_size = ");
    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, CodeactError::TomlError(_)));
}

#[test]
fn unknown_shell_name_is_rejected() {
    let file = write_config(
        r#"
[[security.workspaces]]
id = "main"
path = "/tmp/codeact-main"

[shell]
default_shell = "fish"
"#,
    );
    assert!(load_and_validate(file.path()).is_err());
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_and_validate("/definitely/not/here/Codeact.toml").unwrap_err();
    assert!(matches!(err, CodeactError::IoError(_)));
}
