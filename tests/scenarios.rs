// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end pipeline scenarios over fake transports and runtimes.

use chrono::Duration as ChronoDuration;
use drover_adapters::runtime::FakeRuntime;
use drover_adapters::sink::{TimestampPolicy, TimestampWindow, TransportError};
use drover_adapters::{ContainerMonitor, ContainerMonitorConfig, FakeTransport};
use drover_core::{
    AdjustmentReason, BreakerConfig, BreakerState, Clock, ErrorClass, FakeClock, Ingest,
    IngestError, LogEntry, PipelineMetrics, Position, PositionLog, SourceType, SystemClock,
};
use drover_dispatch::{
    AdaptiveConfig, DispatcherBuilder, DispatcherConfig, DlqReprocessor, Processor,
    ReprocessConfig, RetryPolicy, SinkRunnerConfig,
};
use drover_storage::{DlqSegmentStore, PositionStore, PositionStoreConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn fast_sink_config() -> SinkRunnerConfig {
    SinkRunnerConfig {
        batch_size: 1,
        batch_timeout: Duration::from_millis(10),
        adaptive: AdaptiveConfig {
            enabled: false,
            ..AdaptiveConfig::default()
        },
        ..SinkRunnerConfig::default()
    }
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Three identical submissions inside the dedup window deliver once;
/// the per-source hit counter records the other two.
#[tokio::test(flavor = "multi_thread")]
async fn dedup_window_delivers_once() {
    let clock = Arc::new(FakeClock::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let sink = FakeTransport::new("aggregator");
    let dispatcher = DispatcherBuilder::new(
        DispatcherConfig::default(),
        clock.clone(),
        Arc::clone(&metrics),
    )
    .sink(Arc::new(sink.clone()), fast_sink_config())
    .build();

    let handle = dispatcher.handle();
    let ts = clock.now() + ChronoDuration::milliseconds(250);
    for _ in 0..3 {
        let entry = LogEntry::builder(SourceType::File, "file:/a.log")
            .message("pid=42 started")
            .original_timestamp(ts)
            .build(clock.as_ref());
        handle.try_submit(entry).unwrap();
    }

    assert!(wait_until(|| sink.send_count() >= 1, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sink.sent_messages(), vec!["pid=42 started"]);
    assert_eq!(metrics.dedup_hits("file:/a.log"), 2);
    dispatcher.stop().await.unwrap();
}

/// A far-past timestamp under the clamp policy is delivered at the
/// window boundary with exactly one audit record.
#[tokio::test(flavor = "multi_thread")]
async fn clamp_leaves_an_audit_trail() {
    let clock = Arc::new(FakeClock::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let sink = FakeTransport::new("httpaggregator");
    let window = TimestampWindow {
        max_past: Duration::from_secs(24 * 3600),
        max_future: Duration::from_secs(300),
    };
    let dispatcher = DispatcherBuilder::new(
        DispatcherConfig::default(),
        clock.clone(),
        Arc::clone(&metrics),
    )
    .sink(
        Arc::new(sink.clone()),
        SinkRunnerConfig {
            timestamp_policy: Some((TimestampPolicy::Clamp, window)),
            ..fast_sink_config()
        },
    )
    .build();

    let legacy_ts = chrono::DateTime::parse_from_rfc3339("1990-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let entry = LogEntry::builder(SourceType::File, "file:/a.log")
        .message("legacy")
        .original_timestamp(legacy_ts)
        .build(clock.as_ref());
    dispatcher.handle().try_submit(entry).unwrap();

    assert!(wait_until(|| sink.send_count() == 1, Duration::from_secs(2)).await);
    let delivered = sink.sent_batches()[0].entries()[0].clone();
    let expected = clock.now() - ChronoDuration::hours(24);

    assert_eq!(delivered.timestamp(), expected);
    assert_eq!(delivered.adjustments().len(), 1);
    let adjustment = &delivered.adjustments()[0];
    assert_eq!(adjustment.reason, AdjustmentReason::ClampToWindow);
    assert_eq!(adjustment.from, legacy_ts);
    assert_eq!(adjustment.to, expected);
    assert_eq!(adjustment.component, "httpaggregator");
    assert_eq!(metrics.timestamp_outcomes("clamp", "file:/a.log"), 1);
    dispatcher.stop().await.unwrap();
}

/// A sink outage trips its breaker while the healthy sink keeps
/// receiving; recovery closes the breaker and reprocessing drains the
/// dead letters back to the recovered sink only.
#[tokio::test(flavor = "multi_thread")]
async fn sink_outage_recovery_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(SystemClock);
    let metrics = Arc::new(PipelineMetrics::new());
    let dlq = Arc::new(DlqSegmentStore::open(dir.path(), 1 << 20, 10_000).unwrap());
    let aggregator = FakeTransport::new("aggregator");
    let local = FakeTransport::new("local");
    aggregator.set_always_fail(Some(TransportError::new(
        ErrorClass::TransientNetwork,
        "connection refused",
    )));

    let breaker = BreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        open_timeout: Duration::from_millis(300),
        rolling_window: Duration::from_secs(60),
    };
    let dispatcher = DispatcherBuilder::new(
        DispatcherConfig {
            retry: RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_delay: Duration::from_millis(10),
            },
            ..DispatcherConfig::default()
        },
        clock.clone(),
        Arc::clone(&metrics),
    )
    .dlq(Arc::clone(&dlq))
    .sink(Arc::new(aggregator.clone()), {
        SinkRunnerConfig {
            breaker,
            ..fast_sink_config()
        }
    })
    .sink(Arc::new(local.clone()), fast_sink_config())
    .build();
    let handle = dispatcher.handle();

    // Outage: five entries fail on the aggregator and trip it open
    for i in 0..5 {
        handle
            .try_submit(
                LogEntry::builder(SourceType::File, "file:/a.log")
                    .message(format!("m{i}"))
                    .build(clock.as_ref()),
            )
            .unwrap();
    }
    assert!(
        wait_until(
            || dispatcher
                .sink("aggregator")
                .map(|s| s.breaker_state() == BreakerState::Open)
                .unwrap_or(false),
            Duration::from_secs(5)
        )
        .await
    );

    // The healthy sink saw everything
    assert!(
        wait_until(|| local.sent_messages().len() == 5, Duration::from_secs(2)).await
    );
    // Every failure was dead-lettered
    assert!(
        wait_until(
            || metrics.dlq_entries_written.load(Ordering::Relaxed) == 5,
            Duration::from_secs(2)
        )
        .await
    );

    // Entries keep flowing to the healthy sink during the outage
    handle
        .try_submit(
            LogEntry::builder(SourceType::File, "file:/a.log")
                .message("during-outage")
                .build(clock.as_ref()),
        )
        .unwrap();
    assert!(
        wait_until(|| local.sent_messages().len() == 6, Duration::from_secs(2)).await
    );
    assert_eq!(aggregator.send_count(), 0);

    // Recovery: wait out the open timeout, then two successful
    // half-open probes close the breaker
    aggregator.set_always_fail(None);
    assert!(
        wait_until(
            || dispatcher
                .sink("aggregator")
                .map(|s| s.breaker_state() != BreakerState::Open)
                .unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );
    handle
        .try_submit(
            LogEntry::builder(SourceType::File, "file:/a.log")
                .message("probe-1")
                .build(clock.as_ref()),
        )
        .unwrap();
    assert!(
        wait_until(
            || aggregator.sent_messages().contains(&"probe-1".to_string()),
            Duration::from_secs(2)
        )
        .await
    );
    handle
        .try_submit(
            LogEntry::builder(SourceType::File, "file:/a.log")
                .message("probe-2")
                .build(clock.as_ref()),
        )
        .unwrap();
    assert!(
        wait_until(
            || dispatcher
                .sink("aggregator")
                .map(|s| s.breaker_state() == BreakerState::Closed)
                .unwrap_or(false),
            Duration::from_secs(5)
        )
        .await
    );

    // Reprocessing drains the dead letters to the aggregator only
    let reprocessor = DlqReprocessor::new(
        Arc::clone(&dlq),
        handle.clone(),
        clock.clone() as Arc<dyn Clock>,
        Arc::clone(&metrics),
        ReprocessConfig {
            scan_interval: Duration::from_millis(50),
            rate_limit: 10_000,
            retention: Duration::from_secs(3600),
        },
    );
    dlq.close_active().unwrap();
    let stats = reprocessor
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.resubmitted, 5);

    assert!(
        wait_until(
            || {
                let msgs = aggregator.sent_messages();
                (0..5).all(|i| msgs.contains(&format!("m{i}")))
            },
            Duration::from_secs(5)
        )
        .await
    );

    // No duplicate delivery to the sink that already had them
    let local_count = local
        .sent_messages()
        .iter()
        .filter(|m| m.starts_with('m'))
        .count();
    assert_eq!(local_count, 5);

    dispatcher.stop().await.unwrap();
}

/// Corrupting `positions.json` recovers from the newest checkpoint
/// and reports the corruption exactly once.
#[tokio::test(flavor = "multi_thread")]
async fn position_corruption_recovers_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("positions.json");
    let config = PositionStoreConfig {
        path: path.clone(),
        checkpoint_every: 1,
        ..PositionStoreConfig::default()
    };

    {
        let store =
            PositionStore::open(config.clone(), Arc::new(PipelineMetrics::new())).unwrap();
        store.record(Position::new(
            "/var/log/app.log",
            SourceType::File,
            8192,
            chrono::Utc::now(),
        ));
        store.flush().unwrap();
    }

    // Ungraceful death corrupts the live file
    let data = std::fs::read(&path).unwrap();
    std::fs::write(&path, &data[..10]).unwrap();

    let metrics = Arc::new(PipelineMetrics::new());
    let store = PositionStore::open(config, Arc::clone(&metrics)).unwrap();
    assert_eq!(store.get("/var/log/app.log").unwrap().offset, 8192);
    assert_eq!(
        metrics.position_corruption_detected.load(Ordering::Relaxed),
        1
    );
}

/// One container over six rotation intervals records the expected
/// rotations, and the task population returns to baseline.
#[tokio::test(flavor = "multi_thread")]
async fn container_rotation_continuity() {
    #[derive(Clone, Default)]
    struct CountingIngest {
        seen: Arc<Mutex<Vec<String>>>,
    }
    impl Ingest for CountingIngest {
        fn try_submit(&self, entry: LogEntry) -> Result<(), IngestError> {
            self.seen.lock().push(entry.message().to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryPositions {
        table: Mutex<HashMap<String, Position>>,
    }
    impl PositionLog for MemoryPositions {
        fn load(&self, source_id: &str) -> Option<Position> {
            self.table.lock().get(source_id).cloned()
        }
        fn store(&self, position: Position) {
            self.table
                .lock()
                .insert(position.source_id.clone(), position);
        }
        fn remove(&self, source_id: &str) {
            self.table.lock().remove(source_id);
        }
        fn backpressure(&self) -> f64 {
            0.0
        }
    }

    let runtime = FakeRuntime::new();
    let ingest = CountingIngest::default();
    let metrics = Arc::new(PipelineMetrics::new());
    let monitor = Arc::new(ContainerMonitor::new(
        ContainerMonitorConfig {
            rotation_interval: Duration::from_millis(100),
            read_timeout: Duration::from_millis(50),
            list_interval: Duration::from_millis(100),
            ..ContainerMonitorConfig::default()
        },
        Arc::new(runtime.clone()),
        ingest.clone(),
        Arc::new(MemoryPositions::default()),
        Arc::new(SystemClock),
        Arc::clone(&metrics),
    ));

    runtime.add_container("c1", "steady", &[]);
    let run = {
        let monitor = Arc::clone(&monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    // A line every ~50 ms across several rotations
    for i in 0..12 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        runtime.push_line("c1", chrono::Utc::now(), &format!("tick-{i}"));
    }

    assert!(
        wait_until(|| runtime.streams_opened("c1") >= 5, Duration::from_secs(5)).await
    );
    assert!(metrics.stream_rotations.load(Ordering::Relaxed) >= 4);
    // One live stream at a time
    assert!(monitor.active_streams() <= 1);

    monitor.stop().await;
    run.abort();
    assert_eq!(monitor.active_streams(), 0);
    assert!(
        wait_until(
            || runtime.streams_closed() == runtime.streams_opened("c1"),
            Duration::from_secs(2)
        )
        .await
    );
    assert!(!ingest.seen.lock().is_empty());
}

/// Saturating a 100-slot ingress while a drain runs concurrently: at
/// least 100 of 200 submissions succeed, the overflow is rejected
/// with backpressure, and no submission ever blocks.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backpressure_saturation_rejects_quickly() {
    // Parks the worker inside the processing pipeline while the test
    // holds the gate, wedging everything downstream of the ingress.
    struct GateProcessor {
        gate: Arc<std::sync::Mutex<()>>,
    }
    impl Processor for GateProcessor {
        fn process(&self, entry: LogEntry) -> LogEntry {
            let _held = self.gate.lock().unwrap_or_else(|e| e.into_inner());
            entry
        }
    }

    let gate = Arc::new(std::sync::Mutex::new(()));
    let metrics = Arc::new(PipelineMetrics::new());
    let dispatcher = DispatcherBuilder::new(
        DispatcherConfig {
            queue_size: 100,
            worker_count: 1,
            ..DispatcherConfig::default()
        },
        Arc::new(SystemClock),
        Arc::clone(&metrics),
    )
    .processor(Box::new(GateProcessor {
        gate: Arc::clone(&gate),
    }))
    .build();
    let handle = dispatcher.handle();

    let mut accepted = 0;
    let mut rejected = 0;
    let mut submit = |i: usize| {
        let started = std::time::Instant::now();
        let result = handle.try_submit(
            LogEntry::builder(SourceType::File, "file:/a.log")
                .message(format!("m{i}"))
                .build(&SystemClock),
        );
        assert!(
            started.elapsed() < Duration::from_millis(10),
            "submission blocked"
        );
        match result {
            Ok(()) => accepted += 1,
            Err(IngestError::Backpressure) => rejected += 1,
            Err(e) => panic!("unexpected: {e}"),
        }
    };

    let wedge = gate.lock().unwrap_or_else(|e| e.into_inner());

    // First half: the router drains concurrently into the worker's
    // partition queue, so the ingress keeps accepting throughout
    for i in 0..100 {
        submit(i);
        tokio::task::yield_now().await;
    }
    assert!(wait_until(|| dispatcher.queue_len() == 0, Duration::from_secs(2)).await);

    // Second half: downstream is full behind the gate, so now the
    // ingress itself saturates and the overflow is rejected
    for i in 100..200 {
        submit(i);
    }

    assert!(accepted >= 100, "accepted {accepted}");
    assert!(rejected > 0, "expected overflow rejections");
    assert_eq!(accepted + rejected, 200);
    assert_eq!(
        metrics.queue_rejections.load(Ordering::Relaxed),
        rejected as u64
    );

    // Releasing the drain empties the queue and acceptance resumes
    drop(wedge);
    assert!(
        wait_until(
            || handle
                .try_submit(
                    LogEntry::builder(SourceType::File, "file:/a.log")
                        .message("after-drain")
                        .build(&SystemClock),
                )
                .is_ok(),
            Duration::from_secs(5)
        )
        .await
    );
    dispatcher.stop().await.unwrap();
}

/// Retry concurrency never exceeds the configured semaphore.
#[tokio::test(flavor = "multi_thread")]
async fn retry_concurrency_is_capped() {
    let metrics = Arc::new(PipelineMetrics::new());
    let dir = tempfile::tempdir().unwrap();
    let dlq = Arc::new(DlqSegmentStore::open(dir.path(), 1 << 20, 10_000).unwrap());

    // Many failing sinks, semaphore of 2: most batches dead-letter
    // with saturation instead of queueing retries
    let mut builder = DispatcherBuilder::new(
        DispatcherConfig {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(200),
                multiplier: 2.0,
                max_delay: Duration::from_millis(400),
            },
            retry_concurrency: 2,
            ..DispatcherConfig::default()
        },
        Arc::new(SystemClock),
        Arc::clone(&metrics),
    )
    .dlq(Arc::clone(&dlq));

    for i in 0..6 {
        let transport = FakeTransport::new(format!("sink-{i}"));
        transport.set_always_fail(Some(TransportError::new(
            ErrorClass::TransientNetwork,
            "down",
        )));
        builder = builder.sink(Arc::new(transport), fast_sink_config());
    }
    let dispatcher = builder.build();

    dispatcher
        .handle()
        .try_submit(
            LogEntry::builder(SourceType::File, "file:/a.log")
                .message("fan")
                .build(&SystemClock),
        )
        .unwrap();

    // All six sinks fail concurrently; only two may hold retry slots,
    // so the other four saturate straight to the DLQ
    assert!(
        wait_until(
            || metrics.dlq_entries_written.load(Ordering::Relaxed) >= 4,
            Duration::from_secs(5)
        )
        .await
    );
    assert_eq!(dispatcher.retry_permits_available(), 0);

    dlq.close_active().unwrap();
    let mut saturated = 0;
    for segment in dlq.segments().unwrap() {
        for entry in dlq.read_segment(&segment).unwrap() {
            if entry.reason == ErrorClass::RetrySaturation {
                saturated += 1;
            }
        }
    }
    assert!(saturated >= 4, "expected saturation dead-letters, got {saturated}");

    let _ = dispatcher.stop().await;
}
