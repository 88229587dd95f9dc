// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::SystemClock;
use tempfile::tempdir;

fn config_in(dir: &Path) -> DroverConfig {
    let doc = format!(
        r#"
dispatcher:
  queue_size: 1000
  dlq:
    directory: {dir}/dlq
sinks:
  local:
    type: local_file
    directory: {dir}/out
file_monitor:
  paths: ["{dir}/logs/*.log"]
positions:
  path: {dir}/positions.json
"#,
        dir = dir.display()
    );
    DroverConfig::parse(&doc).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn build_start_shutdown_round_trip() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    std::fs::write(dir.path().join("logs/app.log"), b"line-1\n").unwrap();

    let daemon = Daemon::build(config_in(dir.path()), Arc::new(SystemClock)).unwrap();
    daemon.start();

    // The file monitor picks the line up and it lands in the sink
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let out = dir.path().join("out/drover.jsonl");
    while tokio::time::Instant::now() < deadline && !out.exists() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    daemon.shutdown().await.unwrap();
    let contents = std::fs::read_to_string(&out).unwrap();
    assert!(contents.contains("line-1"));

    // Positions survived the forced flush
    assert!(dir.path().join("positions.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_daemon_cannot_take_the_lock() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::build(config_in(dir.path()), Arc::new(SystemClock)).unwrap();

    match Daemon::build(config_in(dir.path()), Arc::new(SystemClock)) {
        Err(LifecycleError::LockFailed(path)) => {
            assert!(path.ends_with("droverd.lock"));
        }
        other => panic!("expected LockFailed, got {:?}", other.map(|_| ())),
    }

    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reflects_breaker_and_queue_state() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::build(config_in(dir.path()), Arc::new(SystemClock)).unwrap();
    assert_eq!(daemon.health(), drover_core::HealthState::Healthy);
    daemon.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reload_applies_hot_keys_and_rejects_cold() {
    let dir = tempdir().unwrap();
    let daemon = Daemon::build(config_in(dir.path()), Arc::new(SystemClock)).unwrap();

    let mut hot = config_in(dir.path());
    hot.dispatcher.worker_count = 8;
    hot.dispatcher.max_retries = 1;
    daemon.reload(hot).unwrap();

    let mut cold = config_in(dir.path());
    cold.dispatcher.queue_size = 5;
    assert!(matches!(
        daemon.reload(cold),
        Err(ConfigError::NotReloadable(_))
    ));

    daemon.shutdown().await.unwrap();
}

#[test]
fn unsupported_sink_type_fails_build() {
    let dir = tempdir().unwrap();
    let mut config = config_in(dir.path());
    // Bypasses parse-time validation to exercise the build-time check
    if let Some(sink) = config.sinks.get_mut("local") {
        sink.r#type = "message_bus".to_string();
    }
    let result = Daemon::build(config, Arc::new(SystemClock));
    assert!(matches!(result, Err(LifecycleError::Sink { .. })));
}
