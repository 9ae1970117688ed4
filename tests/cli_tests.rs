//! CLI tests for pits-infra
//!
//! Runs the binary against temporary configurations and build directories:
//! - Argument parsing and help output
//! - synth, diff, graph and list subcommands
//! - JSON output mode
//! - Exit codes for configuration and artifact errors

mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        Self::with_config("")
    }

    /// `extra` is appended directly below `assets.root`.
    fn with_config(extra: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let build = dir.path().join("build");
        std::fs::create_dir_all(&build).unwrap();
        write_assets(&build);

        let config = dir.path().join("pits.toml");
        std::fs::write(
            &config,
            format!("[assets]\nroot = \"{}\"\n\n{}", build.display(), extra),
        )
        .unwrap();
        Self { dir, config }
    }

    fn out(&self) -> PathBuf {
        self.dir.path().join("cdk.out")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("pits-infra").unwrap();
        cmd.current_dir(self.dir.path())
            .env_remove("PITS_CONFIG")
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .arg("-c")
            .arg(&self.config);
        cmd
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ============================================================================
// Argument parsing
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("pits-infra")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("synth"))
        .stdout(predicate::str::contains("diff"))
        .stdout(predicate::str::contains("graph"))
        .stdout(predicate::str::contains("list"));
}

#[test]
fn test_unknown_subcommand() {
    Command::cargo_bin("pits-infra")
        .unwrap()
        .arg("deploy")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_invalid_output_format() {
    Command::cargo_bin("pits-infra")
        .unwrap()
        .args(["list", "--output", "xml"])
        .assert()
        .failure();
}

// ============================================================================
// Subcommands
// ============================================================================

#[test]
fn test_synth_writes_assembly() {
    let workspace = Workspace::new();
    workspace
        .cmd()
        .args(["synth", "-o"])
        .arg(workspace.out())
        .assert()
        .success()
        .stdout(predicate::str::contains("PitsDeviceConnectionStack"))
        .stdout(predicate::str::contains("Wrote 7 files"));

    let manifest = read_json(&workspace.out().join("manifest.json"));
    assert_eq!(manifest["order"].as_array().unwrap().len(), 6);
    let template = read_json(&workspace.out().join("PitsDeviceConnectionStack.template.json"));
    assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
}

#[test]
fn test_synth_json_output() {
    let workspace = Workspace::new();
    let output = workspace
        .cmd()
        .args(["synth", "--output", "json", "-o"])
        .arg(workspace.out())
        .output()
        .unwrap();
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(document["type"], "synth");
    assert_eq!(document["stacks"].as_array().unwrap().len(), 6);
}

#[test]
fn test_synth_build_runs_command() {
    // Lands in the [assets] table
    let workspace = Workspace::with_config("build_command = \"touch built.marker\"\n");
    workspace
        .cmd()
        .args(["synth", "--build", "-o"])
        .arg(workspace.out())
        .assert()
        .success();
    assert!(workspace.dir.path().join("built.marker").exists());
}

#[test]
fn test_diff_reports_changes() {
    let workspace = Workspace::new();
    workspace
        .cmd()
        .args(["diff", "--exit-code", "-o"])
        .arg(workspace.out())
        .assert()
        .code(1)
        .stdout(predicate::str::contains("(new)"));

    workspace
        .cmd()
        .args(["synth", "-o"])
        .arg(workspace.out())
        .assert()
        .success();

    workspace
        .cmd()
        .args(["diff", "--exit-code", "-o"])
        .arg(workspace.out())
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));
}

#[test]
fn test_graph_of_stacks() {
    let workspace = Workspace::new();
    workspace
        .cmd()
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph \"pits\""))
        .stdout(predicate::str::contains(
            "\"PitsResourceServiceStack\" -> \"PitsDeviceHealthStack\"",
        ));
}

#[test]
fn test_graph_of_one_stack() {
    let workspace = Workspace::new();
    workspace
        .cmd()
        .args(["graph", "--stack", "PitsConsoleStack"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AWS::CloudFront::Distribution"));

    workspace
        .cmd()
        .args(["graph", "--stack", "Nope"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown stack 'Nope'"));
}

#[test]
fn test_list_in_deploy_order() {
    let workspace = Workspace::new();
    let output = workspace
        .cmd()
        .args(["list", "--output", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let document: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = document["stacks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|stack| stack["name"].as_str().unwrap())
        .collect();
    let position = |name: &str| names.iter().position(|n| *n == name).unwrap();
    assert!(position("PitsDeviceConnectionStack") < position("PitsResourceServiceStack"));
    assert!(position("PitsResourceServiceStack") < position("PitsDataServiceStack"));
}

// ============================================================================
// Exit codes
// ============================================================================

#[test]
fn test_invalid_config_exit_code() {
    let workspace = Workspace::with_config("[device]\nbucket_name = \"Not_A_Bucket\"\n");
    workspace
        .cmd()
        .arg("list")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("bucket_name"));
}

#[test]
fn test_missing_prerequisite_exit_code() {
    let workspace = Workspace::with_config("[authorization]\nenabled = false\n");
    workspace
        .cmd()
        .arg("list")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("data_plane.enabled"));
}

#[test]
fn test_missing_artifacts_exit_code() {
    let workspace = Workspace::new();
    std::fs::remove_dir_all(workspace.dir.path().join("build")).unwrap();
    workspace
        .cmd()
        .arg("list")
        .assert()
        .code(5);
}
