// d365fo-cache-cli/tests/cli_tests.rs
//
// End-to-end CLI tests driving the compiled binary, grounded on the
// teacher's `verity/tests/ml_pipeline_tests.rs` (assert_cmd over a
// temp-directory-isolated environment). No network access is exercised
// here: these cover the profile-management surface, which is pure
// local file I/O, plus the error path for commands that need a
// completed sync.

use assert_cmd::prelude::*;
use predicates::str::contains;
use std::process::Command;
use tempfile::TempDir;

/// Isolates `dirs::config_dir()`/`dirs::state_dir()` resolution to a
/// throwaway `$HOME` so profile saves never touch the real user config.
struct CliTestEnv {
    _home: TempDir,
    home_path: std::path::PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let home = tempfile::tempdir().unwrap();
        let home_path = home.path().to_path_buf();
        CliTestEnv { _home: home, home_path }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("d365fo-cache").unwrap();
        cmd.env("HOME", &self.home_path);
        cmd.env("XDG_CONFIG_HOME", self.home_path.join(".config"));
        cmd.env("XDG_STATE_HOME", self.home_path.join(".local/state"));
        cmd
    }
}

#[test]
fn profile_list_starts_empty() {
    let env = CliTestEnv::new();
    env.cmd().arg("profile").arg("list").assert().success().stdout("");
}

#[test]
fn profile_add_then_list_then_show_round_trips() {
    let env = CliTestEnv::new();

    env.cmd()
        .args(["profile", "add", "contoso", "https://contoso.cloudax.dynamics.com"])
        .assert()
        .success()
        .stdout(contains("saved profile 'contoso'"));

    env.cmd().arg("profile").arg("list").assert().success().stdout(contains("contoso"));

    env.cmd()
        .args(["profile", "show", "contoso"])
        .assert()
        .success()
        .stdout(contains("https://contoso.cloudax.dynamics.com"));
}

#[test]
fn profile_show_on_unknown_name_fails() {
    let env = CliTestEnv::new();
    env.cmd().args(["profile", "show", "nope"]).assert().failure();
}

#[test]
fn entity_get_before_any_sync_reports_not_found() {
    let env = CliTestEnv::new();
    env.cmd()
        .args(["profile", "add", "contoso", "https://contoso.cloudax.dynamics.com"])
        .assert()
        .success();

    env.cmd()
        .args(["--env", "contoso", "entity", "get", "Customers"])
        .assert()
        .failure()
        .stderr(contains("global_version"));
}
