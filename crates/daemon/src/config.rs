// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! YAML configuration.
//!
//! Unknown keys warn instead of failing (captured through flattened
//! maps), so a newer config file still starts an older daemon. Keys
//! that cannot change at runtime are diffed on reload and rejected
//! with a descriptive error; everything else applies live.

use drover_adapters::sink::{TimestampPolicy, TimestampWindow};
use drover_adapters::{ContainerMonitorConfig, FileMonitorConfig, HttpAggregatorConfig, LocalFileConfig};
use drover_core::BreakerConfig;
use drover_dispatch::{
    AdaptiveConfig, DedupConfig, DispatcherConfig, ReprocessConfig, RetryPolicy, SinkRunnerConfig,
};
use drover_storage::PositionStoreConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from configuration loading and reload validation
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("`{0}` cannot change without a restart")]
    NotReloadable(String),
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DroverConfig {
    pub dispatcher: DispatcherSection,
    pub sinks: BTreeMap<String, SinkSection>,
    pub container_monitor: ContainerMonitorSection,
    pub file_monitor: FileMonitorSection,
    pub positions: PositionsSection,
    pub logging: LoggingSection,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    pub queue_size: usize,
    pub worker_count: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: u64,
    pub retry_concurrency: usize,
    pub deduplication: DedupSection,
    pub dlq: DlqSection,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            queue_size: 50_000,
            worker_count: 4,
            batch_size: 1000,
            batch_timeout_ms: 1000,
            max_retries: 3,
            retry_base_delay_ms: 5000,
            retry_multiplier: 2.0,
            retry_max_delay_ms: 60_000,
            retry_concurrency: 100,
            deduplication: DedupSection::default(),
            dlq: DlqSection::default(),
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub window_ms: u64,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100_000,
            ttl_secs: 300,
            window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DlqSection {
    pub enabled: bool,
    pub directory: PathBuf,
    pub segment_size: u64,
    pub segment_entries: u64,
    pub retention_secs: u64,
    pub reprocess_interval_secs: u64,
    pub reprocess_rate_limit: u32,
}

impl Default for DlqSection {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("dlq"),
            segment_size: 16 << 20,
            segment_entries: 10_000,
            retention_secs: 24 * 3600,
            reprocess_interval_secs: 30,
            reprocess_rate_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    /// `http_aggregator` or `local_file`.
    pub r#type: String,
    /// Falls back to `dispatcher.batch_size` when unset.
    pub batch_size: Option<usize>,
    /// Falls back to `dispatcher.batch_timeout_ms` when unset.
    pub batch_timeout_ms: Option<u64>,
    pub queue_size: usize,
    pub adaptive_batching: AdaptiveSection,
    pub circuit_breaker: BreakerSection,

    // http_aggregator
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub gzip: bool,
    pub request_timeout_secs: u64,
    pub labels: BTreeMap<String, String>,
    /// `drop`, `clamp`, `learn`, or `none`.
    pub timestamp_policy: String,
    pub timestamp_max_past_secs: u64,
    pub timestamp_max_future_secs: u64,

    // local_file
    pub directory: PathBuf,
    pub prefix: String,
    pub rotate_bytes: u64,
    pub rotate_age_secs: u64,
    pub compress: bool,
    pub retention_total_bytes: u64,
    pub retention_age_secs: u64,

    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            r#type: String::new(),
            batch_size: None,
            batch_timeout_ms: None,
            queue_size: 10_000,
            adaptive_batching: AdaptiveSection::default(),
            circuit_breaker: BreakerSection::default(),
            endpoint: String::new(),
            bearer_token: None,
            gzip: false,
            request_timeout_secs: 10,
            labels: BTreeMap::new(),
            timestamp_policy: "none".to_string(),
            timestamp_max_past_secs: 24 * 3600,
            timestamp_max_future_secs: 300,
            directory: PathBuf::from("local_file_sink"),
            prefix: "drover".to_string(),
            rotate_bytes: 64 << 20,
            rotate_age_secs: 3600,
            compress: true,
            retention_total_bytes: 1 << 30,
            retention_age_secs: 7 * 24 * 3600,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptiveSection {
    pub enabled: bool,
    pub min_batch: usize,
    pub max_batch: usize,
}

impl Default for AdaptiveSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_batch: 100,
            max_batch: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub rolling_window_secs: u64,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 30,
            rolling_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContainerMonitorSection {
    pub enabled: bool,
    pub rotation_interval_secs: u64,
    pub read_timeout_secs: u64,
    pub name_filters: Vec<String>,
    pub label_filters: BTreeMap<String, String>,
    pub forward_labels: Vec<String>,
    pub max_streams: usize,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ContainerMonitorSection {
    fn default() -> Self {
        Self {
            enabled: false,
            rotation_interval_secs: 300,
            read_timeout_secs: 30,
            name_filters: Vec::new(),
            label_filters: BTreeMap::new(),
            forward_labels: Vec::new(),
            max_streams: 128,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileMonitorSection {
    pub paths: Vec<String>,
    pub ignore_older_than_secs: Option<u64>,
    pub line_max_bytes: usize,
    pub retry_buffer: usize,
    pub poll_interval_ms: u64,
    pub discovery_interval_secs: u64,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for FileMonitorSection {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            ignore_older_than_secs: None,
            line_max_bytes: 256 * 1024,
            retry_buffer: 1024,
            poll_interval_ms: 250,
            discovery_interval_secs: 10,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionsSection {
    pub path: PathBuf,
    pub flush_interval_min_ms: u64,
    pub flush_interval_max_ms: u64,
    pub generations: usize,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

impl Default for PositionsSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("positions.json"),
            flush_interval_min_ms: 500,
            flush_interval_max_ms: 5000,
            generations: 3,
            unknown: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub path: Option<PathBuf>,
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            path: None,
            level: "info".to_string(),
        }
    }
}

impl DroverConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: DroverConfig = serde_yaml::from_str(raw)?;
        config.warn_unknown();
        config.validate()?;
        Ok(config)
    }

    /// Unknown keys are operator typos more often than new features;
    /// say so, loudly, without refusing to start.
    fn warn_unknown(&self) {
        for key in self.unknown.keys() {
            tracing::warn!(key = %key, "unknown configuration key ignored");
        }
        for (section, unknown) in [
            ("dispatcher", &self.dispatcher.unknown),
            ("container_monitor", &self.container_monitor.unknown),
            ("file_monitor", &self.file_monitor.unknown),
            ("positions", &self.positions.unknown),
        ] {
            for key in unknown.keys() {
                tracing::warn!(key = %format!("{section}.{key}"), "unknown configuration key ignored");
            }
        }
        for (id, sink) in &self.sinks {
            for key in sink.unknown.keys() {
                tracing::warn!(key = %format!("sinks.{id}.{key}"), "unknown configuration key ignored");
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.queue_size == 0 {
            return Err(ConfigError::Invalid("dispatcher.queue_size must be > 0".into()));
        }
        if self.dispatcher.worker_count == 0 {
            return Err(ConfigError::Invalid("dispatcher.worker_count must be > 0".into()));
        }
        for (id, sink) in &self.sinks {
            match sink.r#type.as_str() {
                "http_aggregator" => {
                    if sink.endpoint.is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "sinks.{id}.endpoint is required for http_aggregator"
                        )));
                    }
                }
                "local_file" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "sinks.{id}.type `{other}` is not supported"
                    )));
                }
            }
            match sink.timestamp_policy.as_str() {
                "none" | "drop" | "clamp" | "learn" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "sinks.{id}.timestamp_policy `{other}` is not supported"
                    )));
                }
            }
            if sink.queue_size == 0 {
                return Err(ConfigError::Invalid(format!(
                    "sinks.{id}.queue_size must be > 0"
                )));
            }
        }
        if !self.container_monitor.enabled && self.file_monitor.paths.is_empty() {
            tracing::warn!("no monitors configured, nothing will be captured");
        }
        Ok(())
    }

    /// Reject reload changes to keys that are fixed for the process
    /// lifetime.
    pub fn validate_reload(&self, next: &DroverConfig) -> Result<(), ConfigError> {
        if self.dispatcher.queue_size != next.dispatcher.queue_size {
            return Err(ConfigError::NotReloadable("dispatcher.queue_size".into()));
        }
        if self.dispatcher.dlq.directory != next.dispatcher.dlq.directory {
            return Err(ConfigError::NotReloadable("dispatcher.dlq.directory".into()));
        }
        if self.positions.path != next.positions.path {
            return Err(ConfigError::NotReloadable("positions.path".into()));
        }
        for (id, sink) in &self.sinks {
            let Some(next_sink) = next.sinks.get(id) else {
                return Err(ConfigError::NotReloadable(format!("sinks.{id} (removed)")));
            };
            if sink.r#type != next_sink.r#type {
                return Err(ConfigError::NotReloadable(format!("sinks.{id}.type")));
            }
            if sink.queue_size != next_sink.queue_size {
                return Err(ConfigError::NotReloadable(format!("sinks.{id}.queue_size")));
            }
        }
        for id in next.sinks.keys() {
            if !self.sinks.contains_key(id) {
                return Err(ConfigError::NotReloadable(format!("sinks.{id} (added)")));
            }
        }
        Ok(())
    }

    // Component-config projections

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            queue_size: self.dispatcher.queue_size,
            worker_count: self.dispatcher.worker_count,
            dedup: self.dedup_config(),
            retry: self.retry_policy(),
            retry_concurrency: self.dispatcher.retry_concurrency,
            drain_timeout: Duration::from_secs(60),
            sink_stop_timeout: Duration::from_secs(30),
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        let d = &self.dispatcher.deduplication;
        DedupConfig {
            enabled: d.enabled,
            max_entries: d.max_entries,
            ttl: Duration::from_secs(d.ttl_secs),
            window: Duration::from_millis(d.window_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.dispatcher.max_retries,
            base_delay: Duration::from_millis(self.dispatcher.retry_base_delay_ms),
            multiplier: self.dispatcher.retry_multiplier,
            max_delay: Duration::from_millis(self.dispatcher.retry_max_delay_ms),
        }
    }

    pub fn reprocess_config(&self) -> ReprocessConfig {
        let dlq = &self.dispatcher.dlq;
        ReprocessConfig {
            scan_interval: Duration::from_secs(dlq.reprocess_interval_secs.max(1)),
            rate_limit: dlq.reprocess_rate_limit,
            retention: Duration::from_secs(dlq.retention_secs),
        }
    }

    pub fn positions_config(&self) -> PositionStoreConfig {
        PositionStoreConfig {
            path: self.positions.path.clone(),
            flush_interval_min: Duration::from_millis(self.positions.flush_interval_min_ms),
            flush_interval_max: Duration::from_millis(self.positions.flush_interval_max_ms),
            generations: self.positions.generations,
            ..PositionStoreConfig::default()
        }
    }

    pub fn container_monitor_config(&self) -> ContainerMonitorConfig {
        let section = &self.container_monitor;
        ContainerMonitorConfig {
            rotation_interval: Duration::from_secs(section.rotation_interval_secs),
            read_timeout: Duration::from_secs(section.read_timeout_secs),
            name_patterns: section.name_filters.clone(),
            required_labels: section.label_filters.clone(),
            forward_labels: section.forward_labels.clone(),
            max_streams: section.max_streams,
            line_max_bytes: self.file_monitor.line_max_bytes,
            ..ContainerMonitorConfig::default()
        }
    }

    pub fn file_monitor_config(&self) -> FileMonitorConfig {
        let section = &self.file_monitor;
        FileMonitorConfig {
            patterns: section.paths.clone(),
            discovery_interval: Duration::from_secs(section.discovery_interval_secs.max(1)),
            poll_interval: Duration::from_millis(section.poll_interval_ms.max(10)),
            ignore_older_than: section.ignore_older_than_secs.map(Duration::from_secs),
            line_delimiter: b'\n',
            line_max_bytes: section.line_max_bytes,
            retry_buffer: section.retry_buffer,
        }
    }

    /// Effective batch parameters for one sink, with the dispatcher
    /// section supplying the defaults.
    pub fn sink_batch_params(&self, sink: &SinkSection) -> (usize, Duration) {
        (
            sink.batch_size.unwrap_or(self.dispatcher.batch_size),
            Duration::from_millis(
                sink.batch_timeout_ms
                    .unwrap_or(self.dispatcher.batch_timeout_ms),
            ),
        )
    }

    pub fn sink_runner_config(&self, sink: &SinkSection) -> SinkRunnerConfig {
        let (batch_size, batch_timeout) = self.sink_batch_params(sink);
        SinkRunnerConfig {
            batch_size,
            batch_timeout,
            queue_size: sink.queue_size,
            adaptive: AdaptiveConfig {
                enabled: sink.adaptive_batching.enabled,
                min_batch: sink.adaptive_batching.min_batch,
                max_batch: sink.adaptive_batching.max_batch,
                ..AdaptiveConfig::default()
            },
            breaker: breaker_config(&sink.circuit_breaker),
            timestamp_policy: timestamp_policy(sink),
        }
    }

    pub fn http_config(&self, id: &str, sink: &SinkSection) -> HttpAggregatorConfig {
        HttpAggregatorConfig {
            id: id.to_string(),
            endpoint: sink.endpoint.clone(),
            bearer_token: sink.bearer_token.clone(),
            gzip: sink.gzip,
            request_timeout: Duration::from_secs(sink.request_timeout_secs),
            static_labels: sink.labels.clone(),
        }
    }

    pub fn local_file_config(&self, id: &str, sink: &SinkSection) -> LocalFileConfig {
        LocalFileConfig {
            id: id.to_string(),
            directory: sink.directory.clone(),
            prefix: sink.prefix.clone(),
            rotate_bytes: sink.rotate_bytes,
            rotate_age: Duration::from_secs(sink.rotate_age_secs),
            compress: sink.compress,
            retention_total_bytes: sink.retention_total_bytes,
            retention_age: Duration::from_secs(sink.retention_age_secs),
        }
    }
}

pub(crate) fn breaker_config(section: &BreakerSection) -> BreakerConfig {
    BreakerConfig {
        failure_threshold: section.failure_threshold,
        success_threshold: section.success_threshold,
        open_timeout: Duration::from_secs(section.open_timeout_secs),
        rolling_window: Duration::from_secs(section.rolling_window_secs),
    }
}

fn timestamp_policy(sink: &SinkSection) -> Option<(TimestampPolicy, TimestampWindow)> {
    let policy = match sink.timestamp_policy.as_str() {
        "drop" => TimestampPolicy::Drop,
        "clamp" => TimestampPolicy::Clamp,
        "learn" => TimestampPolicy::Learn,
        _ => return None,
    };
    Some((
        policy,
        TimestampWindow {
            max_past: Duration::from_secs(sink.timestamp_max_past_secs),
            max_future: Duration::from_secs(sink.timestamp_max_future_secs),
        },
    ))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
