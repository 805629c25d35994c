//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn isolated_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("create temp dir: {err}"))
}

#[test]
fn cli_without_arguments_prints_usage() {
    let mut cmd = cargo_bin_cmd!("jupyfly");
    cmd.assert().failure().code(2).stderr(contains("Usage"));
}

#[test]
fn cli_help_lists_every_subcommand() {
    let mut cmd = cargo_bin_cmd!("jupyfly");
    cmd.arg("--help");

    cmd.assert().success().stdout(
        contains("provision")
            .and(contains("stop"))
            .and(contains("start"))
            .and(contains("delete"))
            .and(contains("list"))
            .and(contains("batch")),
    );
}

#[test]
fn cli_rejects_unknown_resource_tier() {
    let mut cmd = cargo_bin_cmd!("jupyfly");
    cmd.args(["provision", "alice", "--resources", "huge"]);

    cmd.assert().failure().code(2).stderr(contains("huge"));
}

#[test]
fn cli_reports_missing_token_before_contacting_the_api() {
    let dir = isolated_dir();
    let mut cmd = cargo_bin_cmd!("jupyfly");
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("JUPYFLY_CONFIG_PATH")
        .env_remove("FLY_API_TOKEN")
        .env("FLY_ORGANIZATION", "personal")
        .env("FLY_JUPYTER_IMAGE", "registry.fly.io/jupyter-lab:latest")
        .env("FLY_API_HOST", "http://127.0.0.1:9")
        .arg("list");

    cmd.assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("error: configuration error").and(contains("api_token")));
}

#[test]
fn man_page_documents_every_subcommand() {
    let page = std::fs::read_to_string(env!("JUPYFLY_MAN_PAGE"))
        .unwrap_or_else(|err| panic!("read generated man page: {err}"));

    assert!(page.contains(".TH"), "{page}");
    assert!(page.contains("jupyfly"));
    for subcommand in ["provision", "stop", "start", "delete", "list", "batch"] {
        assert!(page.contains(subcommand), "missing {subcommand}");
    }
}
