// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP log-aggregator transport.
//!
//! Serializes a batch as the aggregator push format: a `streams`
//! array where each stream carries one label set and its entries as
//! `[nanosecond_timestamp, message]` pairs. Timestamps are UTC
//! nanoseconds zero-padded to 19 digits. Entries with different label
//! sets go in different streams; within a stream, ingestion order is
//! preserved.

use super::{SinkTransport, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{Batch, ErrorClass, LogEntry};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one aggregator destination.
#[derive(Debug, Clone)]
pub struct HttpAggregatorConfig {
    pub id: String,
    /// Push endpoint, e.g. `https://logs.example.net/api/v1/push`.
    pub endpoint: String,
    /// Sent as `Authorization: Bearer <token>`; never logged.
    pub bearer_token: Option<String>,
    pub gzip: bool,
    pub request_timeout: Duration,
    /// Labels stamped on every stream in addition to entry labels.
    pub static_labels: BTreeMap<String, String>,
}

impl Default for HttpAggregatorConfig {
    fn default() -> Self {
        Self {
            id: "aggregator".to_string(),
            endpoint: String::new(),
            bearer_token: None,
            gzip: false,
            request_timeout: Duration::from_secs(10),
            static_labels: BTreeMap::new(),
        }
    }
}

/// Batched HTTPS delivery to a log aggregator.
pub struct HttpAggregatorTransport {
    config: HttpAggregatorConfig,
    client: reqwest::Client,
}

impl HttpAggregatorTransport {
    pub fn new(config: HttpAggregatorConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                TransportError::new(ErrorClass::InternalInvariant, format!("http client: {e}"))
            })?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SinkTransport for HttpAggregatorTransport {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        let body = encode_batch(batch, &self.config.static_labels);
        let payload = serde_json::to_vec(&body).map_err(|e| {
            TransportError::new(ErrorClass::InternalInvariant, format!("encode: {e}"))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let payload = if self.config.gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
            gzip_body(&payload)?
        } else {
            payload
        };

        if let Some(token) = &self.config.bearer_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                TransportError::new(ErrorClass::InternalInvariant, "invalid bearer token bytes")
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(headers)
            .body(payload)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body, retry_after))
    }
}

/// Build the push payload, grouping entries into streams by label set
/// in first-appearance order.
pub(crate) fn encode_batch(batch: &Batch, static_labels: &BTreeMap<String, String>) -> Value {
    let mut order: Vec<BTreeMap<String, String>> = Vec::new();
    let mut values: Vec<Vec<Value>> = Vec::new();

    for entry in batch.entries() {
        let labels = stream_labels(entry, static_labels);
        let idx = match order.iter().position(|l| *l == labels) {
            Some(i) => i,
            None => {
                order.push(labels);
                values.push(Vec::new());
                order.len() - 1
            }
        };
        values[idx].push(json!([nanos_19(entry.timestamp()), entry.message()]));
    }

    let streams: Vec<Value> = order
        .into_iter()
        .zip(values)
        .map(|(labels, values)| json!({ "stream": labels, "values": values }))
        .collect();

    json!({ "streams": streams })
}

fn stream_labels(
    entry: &Arc<LogEntry>,
    static_labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = static_labels.clone();
    labels.extend(
        entry
            .labels()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    labels
}

/// UTC nanoseconds since epoch, zero-padded to 19 digits.
pub(crate) fn nanos_19(ts: DateTime<Utc>) -> String {
    let nanos = ts
        .timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp_millis().saturating_mul(1_000_000))
        .max(0);
    format!("{nanos:019}")
}

fn gzip_body(payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(payload)
        .and_then(|_| encoder.finish())
        .map_err(|e| TransportError::new(ErrorClass::InternalInvariant, format!("gzip: {e}")))
}

fn classify_request_error(e: reqwest::Error) -> TransportError {
    // Connect failures, resets, and client-side timeouts are all
    // retryable; the request may or may not have arrived.
    TransportError::new(ErrorClass::TransientNetwork, e.to_string())
}

/// Map a non-success response to the error taxonomy.
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> TransportError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let mut err = TransportError::new(
            ErrorClass::RateLimited,
            format!("rate limited: {}", body_excerpt(body)),
        );
        if let Some(delay) = retry_after {
            err = err.with_retry_after(delay);
        }
        return err;
    }

    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        return TransportError::new(
            ErrorClass::TransientNetwork,
            format!("{status}: {}", body_excerpt(body)),
        );
    }

    if status == StatusCode::BAD_REQUEST && mentions_timestamp(body) {
        return TransportError::new(
            ErrorClass::TimestampOutOfWindow,
            format!("{status}: {}", body_excerpt(body)),
        );
    }

    TransportError::new(
        ErrorClass::PayloadRejected,
        format!("{status}: {}", body_excerpt(body)),
    )
}

/// Aggregators phrase timestamp rejections differently; match the
/// common variants.
fn mentions_timestamp(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("timestamp") || lower.contains("too far behind") || lower.contains("too old")
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

fn body_excerpt(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(200)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
