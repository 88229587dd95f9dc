// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker CLI runtime adapter.
//!
//! Shells out to `docker` the same way an operator would: `docker ps`
//! for the initial list, `docker events` for lifecycle changes, and
//! `docker logs --follow --timestamps --since <ts>` for streams. The
//! events and logs children are killed when their consumers go away.

use super::{
    ContainerEvent, ContainerInfo, ContainerLogLine, ContainerRuntime, LogStream, RuntimeError,
    StreamKind,
};
use crate::subprocess::{run_with_timeout, DOCKER_COMMAND_TIMEOUT};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Runtime adapter backed by the `docker` binary.
#[derive(Clone, Default)]
pub struct DockerCliRuntime;

impl DockerCliRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut cmd = Command::new("docker");
        cmd.args(["ps", "--no-trunc", "--format", "{{json .}}"]);
        let output = run_with_timeout(cmd, DOCKER_COMMAND_TIMEOUT, "docker ps")
            .await
            .map_err(RuntimeError::Unavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::CommandFailed(format!(
                "docker ps: {}",
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            containers.push(parse_ps_line(line)?);
        }
        Ok(containers)
    }

    async fn events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ContainerEvent>, RuntimeError> {
        let mut child = Command::new("docker")
            .args([
                "events",
                "--filter",
                "type=container",
                "--format",
                "{{json .}}",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Unavailable("docker events stdout missing".into()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump_events(child, stdout, tx, cancel));
        Ok(rx)
    }

    async fn follow_logs(
        &self,
        id: &str,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn LogStream>, RuntimeError> {
        let since_arg = since.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let mut child = Command::new("docker")
            .args(["logs", "--follow", "--timestamps", "--since", &since_arg, id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Unavailable("docker logs stdout missing".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::Unavailable("docker logs stderr missing".into()))?;

        Ok(Box::new(DockerLogStream {
            child,
            stdout: BufReader::new(stdout).lines(),
            stderr: BufReader::new(stderr).lines(),
            stderr_open: true,
            stdout_open: true,
        }))
    }
}

/// Forward `docker events` lines until the child exits or the token
/// fires.
async fn pump_events(
    mut child: Child,
    stdout: ChildStdout,
    tx: mpsc::Sender<ContainerEvent>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tx.closed() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    match parse_event_line(&line) {
                        Ok(Some(event)) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "skipping unparsable docker event");
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "docker events stream failed");
                    break;
                }
            },
        }
    }
    let _ = child.kill().await;
}

struct DockerLogStream {
    child: Child,
    stdout: Lines<BufReader<ChildStdout>>,
    stderr: Lines<BufReader<ChildStderr>>,
    stdout_open: bool,
    stderr_open: bool,
}

#[async_trait]
impl LogStream for DockerLogStream {
    async fn next_line(&mut self) -> Result<Option<ContainerLogLine>, RuntimeError> {
        loop {
            if !self.stdout_open && !self.stderr_open {
                return Ok(None);
            }
            tokio::select! {
                line = self.stdout.next_line(), if self.stdout_open => match line? {
                    Some(raw) => return Ok(Some(parse_log_line(&raw, StreamKind::Stdout))),
                    None => self.stdout_open = false,
                },
                line = self.stderr.next_line(), if self.stderr_open => match line? {
                    Some(raw) => return Ok(Some(parse_log_line(&raw, StreamKind::Stderr))),
                    None => self.stderr_open = false,
                },
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.child.kill().await;
    }
}

/// Parse one `docker ps --format '{{json .}}'` line.
fn parse_ps_line(line: &str) -> Result<ContainerInfo, RuntimeError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    let id = value["ID"]
        .as_str()
        .ok_or_else(|| RuntimeError::Parse(format!("missing ID: {line}")))?;
    Ok(ContainerInfo {
        id: id.to_string(),
        name: value["Names"].as_str().unwrap_or_default().to_string(),
        image: value["Image"].as_str().unwrap_or_default().to_string(),
        labels: parse_label_list(value["Labels"].as_str().unwrap_or_default()),
    })
}

/// Parse one `docker events --format '{{json .}}'` line into a
/// lifecycle event. Non-lifecycle actions map to `None`.
fn parse_event_line(line: &str) -> Result<Option<ContainerEvent>, RuntimeError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| RuntimeError::Parse(e.to_string()))?;
    let action = value["Action"]
        .as_str()
        .or_else(|| value["status"].as_str())
        .unwrap_or_default();
    let id = value["Actor"]["ID"]
        .as_str()
        .or_else(|| value["id"].as_str())
        .unwrap_or_default()
        .to_string();
    if id.is_empty() {
        return Ok(None);
    }

    match action {
        "start" => {
            let attributes = &value["Actor"]["Attributes"];
            let mut labels = BTreeMap::new();
            if let Some(map) = attributes.as_object() {
                for (k, v) in map {
                    // Docker mixes labels with metadata keys here
                    if k != "name" && k != "image" {
                        if let Some(v) = v.as_str() {
                            labels.insert(k.clone(), v.to_string());
                        }
                    }
                }
            }
            Ok(Some(ContainerEvent::Started(ContainerInfo {
                id,
                name: attributes["name"].as_str().unwrap_or_default().to_string(),
                image: attributes["image"].as_str().unwrap_or_default().to_string(),
                labels,
            })))
        }
        "die" | "stop" | "kill" | "destroy" => Ok(Some(ContainerEvent::Stopped { id })),
        _ => Ok(None),
    }
}

/// Split a `docker logs --timestamps` line into its RFC 3339 prefix
/// and message. An unparsable prefix leaves the timestamp `None`.
fn parse_log_line(raw: &str, stream: StreamKind) -> ContainerLogLine {
    if let Some((prefix, rest)) = raw.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(prefix) {
            return ContainerLogLine {
                timestamp: Some(ts.with_timezone(&Utc)),
                message: rest.to_string(),
                stream,
            };
        }
    }
    ContainerLogLine {
        timestamp: None,
        message: raw.to_string(),
        stream,
    }
}

/// Docker renders labels as `k=v,k2=v2`.
fn parse_label_list(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
#[path = "docker_tests.rs"]
mod tests;
