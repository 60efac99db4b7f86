//! CLI smoke tests for the `looper plugin` subcommands

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn looper(project: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("looper").unwrap();
    cmd.arg("--project-root").arg(project.path());
    // Keep the user scope inside the sandbox so the host's real plugins
    // never leak into the test.
    cmd.env("HOME", project.path());
    cmd
}

#[test]
fn plugin_list_shows_builtins() {
    let project = TempDir::new().unwrap();

    looper(&project)
        .args(["plugin", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("claude"))
        .stdout(predicate::str::contains("builtin"));
}

#[test]
fn plugin_info_unknown_plugin_fails() {
    let project = TempDir::new().unwrap();

    looper(&project)
        .args(["plugin", "info", "no-such-plugin"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn plugin_create_then_validate() {
    let project = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    looper(&project)
        .args(["plugin", "create", "My.Sample"])
        .arg("--output")
        .arg(out.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("my-sample"));

    let plugin_dir = out.path().join("my-sample");
    assert!(plugin_dir.join("looper-plugin.toml").exists());
    assert!(plugin_dir.join("bin/my-sample").exists());

    looper(&project)
        .args(["plugin", "validate"])
        .arg(&plugin_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("VALID"));
}

#[test]
fn plugin_uninstall_builtin_is_rejected() {
    let project = TempDir::new().unwrap();

    looper(&project)
        .args(["plugin", "uninstall", "claude"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("built-in"));
}

#[test]
fn plugin_validate_reports_errors() {
    let project = TempDir::new().unwrap();
    let broken = TempDir::new().unwrap();
    std::fs::write(
        broken.path().join("looper-plugin.toml"),
        "name = \"broken\"\n",
    )
    .unwrap();

    looper(&project)
        .args(["plugin", "validate"])
        .arg(broken.path())
        .assert()
        .failure()
        .stdout(predicate::str::contains("INVALID"));
}
