// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::process::Command;

#[tokio::test]
async fn captures_stdout_on_success() {
    let mut cmd = Command::new("echo");
    cmd.arg("container-1");
    let output = run_with_timeout(cmd, DOCKER_COMMAND_TIMEOUT, "docker ps")
        .await
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "container-1");
}

#[tokio::test]
async fn nonzero_exit_is_reported_via_status_not_err() {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", "exit 3"]);
    let output = run_with_timeout(cmd, DOCKER_COMMAND_TIMEOUT, "docker inspect")
        .await
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[tokio::test]
async fn missing_binary_is_a_described_error() {
    let cmd = Command::new("/nonexistent/docker");
    let err = run_with_timeout(cmd, DOCKER_COMMAND_TIMEOUT, "docker events")
        .await
        .unwrap_err();
    assert!(err.starts_with("docker events failed:"), "got: {}", err);
}

#[tokio::test]
async fn timeout_kills_and_describes() {
    let mut cmd = Command::new("sleep");
    cmd.arg("30");
    let err = run_with_timeout(cmd, Duration::from_millis(50), "docker logs")
        .await
        .unwrap_err();
    assert!(err.contains("timed out"), "got: {}", err);
    assert!(err.contains("docker logs"), "got: {}", err);
}
