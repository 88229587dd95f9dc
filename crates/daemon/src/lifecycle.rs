// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component assembly and the start/reload/shutdown sequence.
//!
//! Startup order: position store (with recovery), DLQ, sink
//! transports, dispatcher, monitors. Shutdown reverses it: producers
//! first, then the dispatcher drains and flushes sinks, then
//! positions get a forced flush, and the DLQ writer closes. Every
//! stage is bounded; an overrun surfaces as `shutdown_timeout`.

use crate::config::{breaker_config, ConfigError, DroverConfig};
use crate::health::{derive_health, HealthInputs};
use arc_swap::ArcSwap;
use drover_adapters::sink::SinkTransport;
use drover_adapters::{
    ContainerMonitor, DockerCliRuntime, FileMonitor, HttpAggregatorTransport, LocalFileTransport,
};
use drover_core::{Clock, HealthState, PipelineMetrics, PositionLog};
use drover_dispatch::{Dispatcher, DispatcherBuilder, DispatcherHandle, DlqReprocessor};
use drover_storage::{DlqSegmentStore, PositionStore};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Errors that can occur in daemon lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("position store error: {0}")]
    Positions(#[from] drover_storage::StoreError),
    #[error("dlq error: {0}")]
    Dlq(#[from] drover_storage::DlqError),
    #[error("sink `{id}` failed to initialize: {message}")]
    Sink { id: String, message: String },
    #[error("another daemon holds the lock at {0}")]
    LockFailed(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("shutdown error: {0}")]
    Shutdown(#[from] drover_dispatch::DispatchError),
}

/// The assembled process.
pub struct Daemon {
    config: ArcSwap<DroverConfig>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    positions: Arc<PositionStore>,
    dlq: Option<Arc<DlqSegmentStore>>,
    dispatcher: Dispatcher,
    container_monitor: Option<Arc<ContainerMonitor<DispatcherHandle, DockerCliRuntime>>>,
    file_monitor: Option<Arc<FileMonitor<DispatcherHandle>>>,
    tasks: TaskTracker,
    cancel: CancellationToken,
    /// Reprocessed counter at the last health check, for growth rate.
    dlq_seen: AtomicU64,
    _lock: File,
}

impl Daemon {
    /// Construct every component. Nothing runs until [`Daemon::start`].
    pub fn build(config: DroverConfig, clock: Arc<dyn Clock>) -> Result<Self, LifecycleError> {
        let metrics = Arc::new(PipelineMetrics::new());

        let lock = acquire_lock(&config.positions.path)?;

        let positions = Arc::new(PositionStore::open(
            config.positions_config(),
            Arc::clone(&metrics),
        )?);

        let dlq = if config.dispatcher.dlq.enabled {
            let section = &config.dispatcher.dlq;
            Some(Arc::new(DlqSegmentStore::open(
                &section.directory,
                section.segment_size,
                section.segment_entries,
            )?))
        } else {
            None
        };

        let mut builder = DispatcherBuilder::new(
            config.dispatcher_config(),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );
        if let Some(dlq) = &dlq {
            builder = builder.dlq(Arc::clone(dlq));
        }
        for (id, sink) in &config.sinks {
            let transport = build_transport(&config, id, sink, &clock)?;
            builder = builder.sink(transport, config.sink_runner_config(sink));
        }
        let dispatcher = builder.build();
        let handle = dispatcher.handle();

        let container_monitor = if config.container_monitor.enabled {
            Some(Arc::new(ContainerMonitor::new(
                config.container_monitor_config(),
                Arc::new(DockerCliRuntime::new()),
                handle.clone(),
                Arc::clone(&positions) as Arc<dyn PositionLog>,
                Arc::clone(&clock),
                Arc::clone(&metrics),
            )))
        } else {
            None
        };

        let file_monitor = if config.file_monitor.paths.is_empty() {
            None
        } else {
            Some(Arc::new(FileMonitor::new(
                config.file_monitor_config(),
                handle,
                Arc::clone(&positions) as Arc<dyn PositionLog>,
                Arc::clone(&clock),
                Arc::clone(&metrics),
            )))
        };

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            clock,
            metrics,
            positions,
            dlq,
            dispatcher,
            container_monitor,
            file_monitor,
            tasks: TaskTracker::new(),
            cancel: CancellationToken::new(),
            dlq_seen: AtomicU64::new(0),
            _lock: lock,
        })
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.dispatcher.handle()
    }

    /// Spawn the monitors, the adaptive position flusher, and the DLQ
    /// reprocessor.
    pub fn start(&self) {
        if let Some(monitor) = &self.container_monitor {
            let monitor = Arc::clone(monitor);
            self.tasks.spawn(async move { monitor.run().await });
            tracing::info!("container monitor started");
        }
        if let Some(monitor) = &self.file_monitor {
            let monitor = Arc::clone(monitor);
            self.tasks.spawn(async move { monitor.run().await });
            tracing::info!("file monitor started");
        }

        self.spawn_position_flusher();

        if let Some(dlq) = &self.dlq {
            let reprocessor = DlqReprocessor::new(
                Arc::clone(dlq),
                self.dispatcher.handle(),
                Arc::clone(&self.clock),
                Arc::clone(&self.metrics),
                self.config.load().reprocess_config(),
            );
            let cancel = self.cancel.child_token();
            self.tasks.spawn(async move { reprocessor.run(cancel).await });
        }

        tracing::info!("drover started");
    }

    /// Flush positions on the store's adaptive cadence.
    fn spawn_position_flusher(&self) {
        let positions = Arc::clone(&self.positions);
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            loop {
                let interval = positions.adaptive_interval();
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if positions.dirty() {
                    if let Err(e) = positions.flush() {
                        tracing::error!(error = %e, "position flush failed");
                    }
                }
            }
        });
    }

    /// Apply a new configuration to the running process.
    pub fn reload(&self, next: DroverConfig) -> Result<(), ConfigError> {
        let current = self.config.load();
        current.validate_reload(&next)?;

        self.dispatcher.update_dedup(next.dedup_config());
        self.dispatcher.update_retry(next.retry_policy());
        if next.dispatcher.worker_count != current.dispatcher.worker_count {
            self.dispatcher.set_worker_count(next.dispatcher.worker_count);
        }
        for (id, sink) in &next.sinks {
            if let Some(handle) = self.dispatcher.sink(id) {
                let (batch_size, batch_timeout) = next.sink_batch_params(sink);
                handle.update(batch_size, batch_timeout, breaker_config(&sink.circuit_breaker));
            }
        }
        if let Some(monitor) = &self.container_monitor {
            monitor.update_config(next.container_monitor_config());
        }
        if let Some(monitor) = &self.file_monitor {
            monitor.update_config(next.file_monitor_config());
        }

        self.config.store(Arc::new(next));
        tracing::info!("configuration reloaded");
        Ok(())
    }

    /// Current health, from live pipeline signals.
    pub fn health(&self) -> HealthState {
        let written = self.metrics.dlq_entries_written.load(Ordering::Relaxed)
            + self.metrics.dlq_entries_reprocessed.load(Ordering::Relaxed);
        let seen = self.dlq_seen.swap(written, Ordering::Relaxed);

        let inputs = HealthInputs {
            breaker_states: self
                .dispatcher
                .sinks()
                .iter()
                .map(|s| s.breaker_state())
                .collect(),
            queue_utilization: self.dispatcher.handle().queue_utilization(),
            dlq_growth: written.saturating_sub(seen),
            position_backpressure: self.positions.backpressure(),
        };
        derive_health(&inputs)
    }

    /// Orderly shutdown: producers, dispatcher (drain + sink flush),
    /// positions, DLQ writer.
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        tracing::info!("shutting down");

        if let Some(monitor) = &self.container_monitor {
            monitor.stop().await;
        }
        if let Some(monitor) = &self.file_monitor {
            monitor.stop().await;
        }
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let mut first_error: Option<LifecycleError> = None;
        if let Err(e) = self.dispatcher.stop().await {
            first_error.get_or_insert(e.into());
        }

        if let Err(e) = self.positions.force_flush() {
            first_error.get_or_insert(e.into());
        }

        if let Some(dlq) = &self.dlq {
            if let Err(e) = dlq.close_active() {
                first_error.get_or_insert(e.into());
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("shutdown complete");
                Ok(())
            }
        }
    }
}

/// One daemon per position file.
fn acquire_lock(positions_path: &Path) -> Result<File, LifecycleError> {
    let dir = positions_path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let lock_path = dir.join("droverd.lock");
    let file = File::create(&lock_path)?;
    file.try_lock_exclusive()
        .map_err(|_| LifecycleError::LockFailed(lock_path))?;
    Ok(file)
}

fn build_transport(
    config: &DroverConfig,
    id: &str,
    sink: &crate::config::SinkSection,
    clock: &Arc<dyn Clock>,
) -> Result<Arc<dyn SinkTransport>, LifecycleError> {
    match sink.r#type.as_str() {
        "http_aggregator" => {
            let transport = HttpAggregatorTransport::new(config.http_config(id, sink)).map_err(
                |e| LifecycleError::Sink {
                    id: id.to_string(),
                    message: e.to_string(),
                },
            )?;
            Ok(Arc::new(transport))
        }
        "local_file" => {
            let transport = LocalFileTransport::new(config.local_file_config(id, sink), Arc::clone(clock))
                .map_err(|e| LifecycleError::Sink {
                    id: id.to_string(),
                    message: e.to_string(),
                })?;
            Ok(Arc::new(transport))
        }
        other => Err(LifecycleError::Sink {
            id: id.to_string(),
            message: format!("unsupported sink type `{other}`"),
        }),
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
