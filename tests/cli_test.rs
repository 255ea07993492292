/*!
 * Command-line behaviour that needs no database
 *
 * Runs the built binary and checks argument handling, configuration loading
 * and the exit codes reported before any server is contacted.
 */

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn reclone(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_reclone"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run reclone")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_lists_connection_options() {
    let output = reclone(&["--help"]);
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--source-host",
        "--target-host",
        "--force",
        "--config",
        "--preflight-only",
        "--monitor-timeout",
    ] {
        assert!(text.contains(flag), "help should mention {}", flag);
    }
}

#[test]
fn test_version() {
    let output = reclone(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_hosts_required_without_config() {
    let output = reclone(&["--source-host", "db-a"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("--target-host"));
}

#[test]
fn test_missing_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("absent.toml");

    let output = reclone(&["--config", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Failed to load"));
}

#[test]
fn test_same_instance_rejected() {
    let output = reclone(&[
        "--source-host",
        "db-a",
        "--source-user",
        "clone_user",
        "--target-host",
        "db-a",
        "--target-user",
        "clone_user",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("different instances"));
}

#[test]
fn test_command_line_overrides_config_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("reclone.toml");
    fs::write(
        &path,
        r#"
[source]
host = "db-a"
user = "clone_user"

[target]
host = "db-c"
user = "clone_user"

[reconnect]
attempts = 10
"#,
    )
    .unwrap();

    // The file alone is valid; overriding the attempt count with zero is not
    let output = reclone(&[
        "--config",
        path.to_str().unwrap(),
        "--reconnect-attempts",
        "0",
        "--json",
    ]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("reconnect.attempts"));
}
