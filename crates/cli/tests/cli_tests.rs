//! CLI integration tests

use std::process::Command;

fn kscale(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_kscale"))
        .args(args)
        .env_remove("KUBECONFIG")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = kscale(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Scale Kubernetes workloads"), "Should show about text");
    assert!(stdout.contains("fixed"), "Should show fixed command");
    assert!(stdout.contains("metric"), "Should show metric command");
    assert!(stdout.contains("schedule"), "Should show schedule command");
    assert!(stdout.contains("batch"), "Should show batch command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = kscale(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("kscale"), "Should show binary name");
}

#[test]
fn test_metric_help_lists_thresholds() {
    let output = kscale(&["metric", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--cpu-threshold"));
    assert!(stdout.contains("--mem-threshold"));
    assert!(stdout.contains("--step-size"));
    assert!(stdout.contains("--dry-run"));
    assert!(stdout.contains("--max-operations"));
}

#[test]
fn test_name_and_selector_conflict() {
    let output = kscale(&[
        "fixed",
        "--name",
        "web",
        "--selector",
        "app=web",
        "--replicas",
        "2",
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("cannot be used with"));
}

#[test]
fn test_name_or_selector_required() {
    let output = kscale(&["fixed", "--replicas", "2"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--name"));
}

#[test]
fn test_unknown_workload_kind_rejected() {
    let output = kscale(&["fixed", "--kind", "daemonset", "--name", "agent", "--replicas", "1"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported workload type"));
}

#[test]
fn test_malformed_schedule_rejected_before_connecting() {
    let output = kscale(&["schedule", "--name", "web", "--at", "25:99", "--replicas", "2"]);

    assert!(!output.status.success());
}
