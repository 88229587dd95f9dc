// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optional processing pipeline.
//!
//! Processors run after dedup and before fan-out. Because entries are
//! immutable after ingestion, a processor that wants different labels
//! returns a new entry.

use drover_core::LogEntry;

/// One enrichment step.
pub trait Processor: Send + Sync + 'static {
    fn process(&self, entry: LogEntry) -> LogEntry;
}

/// Stamps a fixed label set onto every entry.
pub struct StaticLabelProcessor {
    labels: Vec<(String, String)>,
}

impl StaticLabelProcessor {
    pub fn new<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            labels: labels.into_iter().collect(),
        }
    }
}

impl Processor for StaticLabelProcessor {
    fn process(&self, entry: LogEntry) -> LogEntry {
        if self.labels.is_empty() {
            return entry;
        }
        entry.with_extra_labels(self.labels.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::{FakeClock, SourceType};

    #[test]
    fn static_labels_are_added_without_mutating_input_semantics() {
        let clock = FakeClock::new();
        let entry = LogEntry::builder(SourceType::File, "/a")
            .message("m")
            .label("app", "web")
            .build(&clock);

        let processor = StaticLabelProcessor::new([("env".to_string(), "prod".to_string())]);
        let enriched = processor.process(entry);
        assert_eq!(enriched.labels()["env"], "prod");
        assert_eq!(enriched.labels()["app"], "web");
    }
}
