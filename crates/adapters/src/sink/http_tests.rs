// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;
use drover_core::{FakeClock, OpenBatch, SourceType};

fn entry_at(clock: &FakeClock, msg: &str, labels: &[(&str, &str)]) -> Arc<LogEntry> {
    let mut builder = LogEntry::builder(SourceType::File, "/a.log").message(msg);
    for (k, v) in labels {
        builder = builder.label(*k, *v);
    }
    Arc::new(builder.build(clock))
}

fn batch(entries: Vec<Arc<LogEntry>>, clock: &FakeClock) -> Batch {
    let mut open = OpenBatch::new("aggregator", clock);
    for e in entries {
        open.push(e);
    }
    open.seal()
}

#[test]
fn nanos_are_zero_padded_to_19_digits() {
    let ts = Utc.timestamp_opt(1, 5).unwrap();
    assert_eq!(nanos_19(ts), "0000000001000000005");

    let epoch = Utc.timestamp_opt(0, 0).unwrap();
    assert_eq!(nanos_19(epoch), "0000000000000000000");

    // 2025-01-01T00:00:00Z
    let modern = Utc.timestamp_opt(1_735_689_600, 0).unwrap();
    assert_eq!(nanos_19(modern), "1735689600000000000");
    assert_eq!(nanos_19(modern).len(), 19);
}

#[test]
fn encode_groups_streams_by_label_set() {
    let clock = FakeClock::new();
    let b = batch(
        vec![
            entry_at(&clock, "web-1", &[("app", "web")]),
            entry_at(&clock, "db-1", &[("app", "db")]),
            entry_at(&clock, "web-2", &[("app", "web")]),
        ],
        &clock,
    );

    let body = encode_batch(&b, &BTreeMap::new());
    let streams = body["streams"].as_array().unwrap();
    assert_eq!(streams.len(), 2);

    // First-appearance order, entry order preserved within a stream
    assert_eq!(streams[0]["stream"]["app"], "web");
    let web_values = streams[0]["values"].as_array().unwrap();
    assert_eq!(web_values[0][1], "web-1");
    assert_eq!(web_values[1][1], "web-2");

    assert_eq!(streams[1]["stream"]["app"], "db");
    assert_eq!(streams[1]["values"].as_array().unwrap().len(), 1);
}

#[test]
fn encode_merges_static_labels() {
    let clock = FakeClock::new();
    let b = batch(vec![entry_at(&clock, "m", &[("app", "web")])], &clock);
    let mut statics = BTreeMap::new();
    statics.insert("host".to_string(), "node-1".to_string());

    let body = encode_batch(&b, &statics);
    let stream = &body["streams"][0]["stream"];
    assert_eq!(stream["host"], "node-1");
    assert_eq!(stream["app"], "web");
}

#[test]
fn entry_labels_override_static_labels() {
    let clock = FakeClock::new();
    let b = batch(vec![entry_at(&clock, "m", &[("host", "inner")])], &clock);
    let mut statics = BTreeMap::new();
    statics.insert("host".to_string(), "outer".to_string());

    let body = encode_batch(&b, &statics);
    assert_eq!(body["streams"][0]["stream"]["host"], "inner");
}

#[test]
fn encode_is_bit_exact_for_a_known_batch() {
    let clock = FakeClock::new(); // 2025-01-01T00:00:00Z
    let b = batch(vec![entry_at(&clock, "hello", &[("app", "web")])], &clock);
    let body = encode_batch(&b, &BTreeMap::new());
    assert_eq!(
        serde_json::to_string(&body).unwrap(),
        r#"{"streams":[{"stream":{"app":"web"},"values":[["1735689600000000000","hello"]]}]}"#
    );
}

#[yare::parameterized(
    rate_limited  = { 429, "slow down", ErrorClass::RateLimited },
    server_error  = { 500, "boom", ErrorClass::TransientNetwork },
    bad_gateway   = { 502, "", ErrorClass::TransientNetwork },
    req_timeout   = { 408, "", ErrorClass::TransientNetwork },
    ts_rejected   = { 400, "entry too far behind", ErrorClass::TimestampOutOfWindow },
    ts_rejected2  = { 400, "invalid timestamp", ErrorClass::TimestampOutOfWindow },
    other_400     = { 400, "malformed json", ErrorClass::PayloadRejected },
    forbidden     = { 403, "", ErrorClass::PayloadRejected },
)]
fn status_classification(code: u16, body: &str, expected: ErrorClass) {
    let status = StatusCode::from_u16(code).unwrap();
    let err = classify_status(status, body, None);
    assert_eq!(err.class, expected);
}

#[test]
fn retry_after_is_carried_for_rate_limits() {
    let err = classify_status(
        StatusCode::TOO_MANY_REQUESTS,
        "",
        Some(Duration::from_secs(7)),
    );
    assert_eq!(err.retry_after, Some(Duration::from_secs(7)));
    assert!(err.is_retryable());
}
