// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The log entry that traverses the pipeline, with its timestamp
//! audit trail.
//!
//! An entry is immutable after ingestion except for two narrow
//! mutations: `adjust_timestamp`, which always appends an audit
//! record, and `mark_processed`. Labels are copied once at ingestion
//! and never mutated in place; a component that needs different
//! labels builds a new entry.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Appended to a message that exceeded the configured line cap.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Where an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    File,
    Container,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceType::File => write!(f, "file"),
            SourceType::Container => write!(f, "container"),
        }
    }
}

/// Closed set of reasons a delivery timestamp may be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    DriftCorrection,
    ClampToWindow,
    TimezoneFix,
    InvalidFallback,
}

impl fmt::Display for AdjustmentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdjustmentReason::DriftCorrection => "drift_correction",
            AdjustmentReason::ClampToWindow => "clamp_to_window",
            AdjustmentReason::TimezoneFix => "timezone_fix",
            AdjustmentReason::InvalidFallback => "invalid_fallback",
        };
        write!(f, "{s}")
    }
}

/// Audit record for one change of the delivery timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampAdjustment {
    pub reason: AdjustmentReason,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub at: DateTime<Utc>,
    /// Component that made the change (e.g. "httpaggregator").
    pub component: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// A single normalized log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time claimed by the source. Set exactly once.
    original_timestamp: DateTime<Utc>,
    /// When the dispatcher first saw the entry. Set exactly once.
    ingestion_timestamp: DateTime<Utc>,
    /// The value sent downstream; every change appends to `adjustments`.
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    adjustments: Vec<TimestampAdjustment>,
    message: String,
    source_type: SourceType,
    source_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    processed_at: Option<DateTime<Utc>>,
}

impl LogEntry {
    /// Start building an entry for the given source.
    pub fn builder(source_type: SourceType, source_id: impl Into<String>) -> EntryBuilder {
        EntryBuilder {
            source_type,
            source_id: source_id.into(),
            message: String::new(),
            original_timestamp: None,
            labels: BTreeMap::new(),
            trace_id: None,
            span_id: None,
        }
    }

    pub fn original_timestamp(&self) -> DateTime<Utc> {
        self.original_timestamp
    }

    pub fn ingestion_timestamp(&self) -> DateTime<Utc> {
        self.ingestion_timestamp
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn adjustments(&self) -> &[TimestampAdjustment] {
        &self.adjustments
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.processed_at
    }

    /// Rewrite the delivery timestamp, appending the audit record.
    pub fn adjust_timestamp(
        &mut self,
        reason: AdjustmentReason,
        to: DateTime<Utc>,
        component: &str,
        details: Option<String>,
        clock: &dyn Clock,
    ) {
        let from = self.timestamp;
        self.adjustments.push(TimestampAdjustment {
            reason,
            from,
            to,
            at: clock.now(),
            component: component.to_string(),
            details,
        });
        self.timestamp = to;
    }

    /// Stamp the entry as having completed the processing pipeline.
    pub fn mark_processed(&mut self, clock: &dyn Clock) {
        self.processed_at = Some(clock.now());
    }

    /// Build a new entry carrying extra labels.
    ///
    /// Labels are immutable after ingestion, so enrichment produces a
    /// fresh entry rather than mutating this one.
    pub fn with_extra_labels<I>(&self, extra: I) -> LogEntry
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut labels = self.labels.clone();
        labels.extend(extra);
        LogEntry {
            labels,
            ..self.clone()
        }
    }
}

/// Builder for [`LogEntry`]. The ingestion timestamp is stamped at
/// `build`, which is the only way to construct an entry.
#[derive(Debug)]
pub struct EntryBuilder {
    source_type: SourceType,
    source_id: String,
    message: String,
    original_timestamp: Option<DateTime<Utc>>,
    labels: BTreeMap<String, String>,
    trace_id: Option<String>,
    span_id: Option<String>,
}

impl EntryBuilder {
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Timestamp claimed by the source. Defaults to the ingestion time.
    pub fn original_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.original_timestamp = Some(ts);
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn labels<I>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.labels.extend(labels);
        self
    }

    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn span_id(mut self, id: impl Into<String>) -> Self {
        self.span_id = Some(id.into());
        self
    }

    pub fn build(self, clock: &dyn Clock) -> LogEntry {
        let ingestion = clock.now();
        let original = self.original_timestamp.unwrap_or(ingestion);
        LogEntry {
            original_timestamp: original,
            ingestion_timestamp: ingestion,
            timestamp: original,
            adjustments: Vec::new(),
            message: self.message,
            source_type: self.source_type,
            source_id: self.source_id,
            labels: self.labels,
            trace_id: self.trace_id,
            span_id: self.span_id,
            processed_at: None,
        }
    }
}

/// Truncate a line to `cap` bytes, appending [`TRUNCATION_MARKER`].
///
/// The cut lands on a char boundary so the result stays valid UTF-8.
/// Lines at or under the cap are returned unchanged.
pub fn truncate_line(line: &str, cap: usize) -> String {
    if line.len() <= cap {
        return line.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&line[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
