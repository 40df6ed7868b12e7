//! Integration tests for the shepherd binary
//!
//! Each test runs the compiled binary against a settings file and file
//! storage in a temporary directory.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn shepherd(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_shepherd"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("SHEPHERD_CONFIG")
        .args(args)
        .output()
        .unwrap()
}

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("shepherd.yml"),
        "retries: 0\ndelay: 0\nmanifest_path: stack.yml\nstorage:\n  name: FileStorage\n  settings:\n    path: stacks\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("stack.yml"),
        "resources:\n  - local_name: web\n    type: SecurityGroup\n    provider: aws\n    group_description: web tier\n",
    )
    .unwrap();
    dir
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn test_create_list_show_destroy() {
    let dir = workspace();

    let created = shepherd(dir.path(), &["create", "--name", "web"]);
    assert!(created.status.success(), "{}", String::from_utf8_lossy(&created.stderr));
    let global_name = stdout(&created).trim().to_string();
    assert!(global_name.starts_with("web_"));
    assert!(dir.path().join("stacks").join(format!("{global_name}.json")).exists());

    let listed = shepherd(dir.path(), &["list", "--tag", "stack_name=web"]);
    assert!(listed.status.success());
    assert_eq!(stdout(&listed).trim(), global_name);

    let shown = shepherd(dir.path(), &["show", &global_name]);
    assert!(shown.status.success());
    let record: serde_json::Value = serde_json::from_str(&stdout(&shown)).unwrap();
    assert_eq!(record["local_name"], "web");
    assert_eq!(record["resources"][0]["type"], "SecurityGroup");

    let destroyed = shepherd(dir.path(), &["destroy", &global_name]);
    assert!(destroyed.status.success(), "{}", String::from_utf8_lossy(&destroyed.stderr));
    assert_eq!(stdout(&destroyed).trim(), global_name);
}

#[test]
fn test_unknown_resource_type_fails() {
    let dir = workspace();
    std::fs::write(
        dir.path().join("bad.yml"),
        "- local_name: bucket\n  type: S3Bucket\n  provider: aws\n",
    )
    .unwrap();

    let output = shepherd(dir.path(), &["create", "--name", "web", "--manifest", "bad.yml"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("S3Bucket"));
    assert!(!dir.path().join("stacks").exists());
}

#[test]
fn test_show_missing_stack_fails() {
    let dir = workspace();
    let output = shepherd(dir.path(), &["show", "ghost"]);
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
}

#[test]
fn test_json_logs_go_to_stderr() {
    let dir = workspace();
    let output = shepherd(dir.path(), &["--json", "-l", "info", "list"]);
    assert!(output.status.success());
    assert!(stdout(&output).is_empty());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.lines().all(|line| line.trim_start().starts_with('{')));
}

#[test]
fn test_settings_verbosity_sets_default_level() {
    let dir = workspace();
    std::fs::write(
        dir.path().join("shepherd.yml"),
        "verbosity: 0\nretries: 0\ndelay: 0\nmanifest_path: stack.yml\nstorage:\n  name: FileStorage\n  settings:\n    path: stacks\n",
    )
    .unwrap();

    let quiet = shepherd(dir.path(), &["create", "--name", "web"]);
    assert!(quiet.status.success());
    assert!(quiet.stderr.is_empty(), "{}", String::from_utf8_lossy(&quiet.stderr));

    let loud = shepherd(dir.path(), &["-l", "info", "create", "--name", "api"]);
    assert!(loud.status.success());
    assert!(String::from_utf8_lossy(&loud.stderr).contains("Creating resource"));
}
