//! Metrics for the consumer core
//!
//! Counters and histograms are emitted through the `metrics` facade. When
//! the `metrics` feature is disabled every function below becomes a no-op
//! with the same signature, so call sites compile unchanged.

#[cfg(feature = "metrics")]
use metrics::{counter, histogram};

/// Record one successfully processed message.
#[cfg(feature = "metrics")]
pub fn record_message_processed(topic: &str, partition: i32) {
    counter!(
        "streamtail_messages_processed_total",
        "topic" => topic.to_string(),
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record one successfully processed batch and its size.
#[cfg(feature = "metrics")]
pub fn record_batch_processed(topic: &str, partition: i32, message_count: usize) {
    counter!(
        "streamtail_batches_processed_total",
        "topic" => topic.to_string(),
        "partition" => partition.to_string()
    )
    .increment(1);
    histogram!(
        "streamtail_batch_messages",
        "topic" => topic.to_string()
    )
    .record(message_count as f64);
}

/// Record a group rejoin forced by a recoverable error.
#[cfg(feature = "metrics")]
pub fn record_group_rejoin(group_id: &str, reason: &str) {
    counter!(
        "streamtail_group_rejoins_total",
        "group" => group_id.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a fetch-path error absorbed by the consume loop.
#[cfg(feature = "metrics")]
pub fn record_fetch_error(kind: &str) {
    counter!(
        "streamtail_fetch_errors_total",
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an offset commit and how many partitions it covered.
#[cfg(feature = "metrics")]
pub fn record_offset_commit(partitions: usize) {
    counter!("streamtail_offset_commits_total").increment(1);
    histogram!("streamtail_offset_commit_partitions").record(partitions as f64);
}

/// Record the duration of one instrumented user callback.
#[cfg(feature = "metrics")]
pub fn record_callback_duration(event: &'static str, seconds: f64) {
    histogram!(
        "streamtail_callback_duration_seconds",
        "event" => event
    )
    .record(seconds);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_message_processed(_topic: &str, _partition: i32) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_batch_processed(_topic: &str, _partition: i32, _message_count: usize) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_group_rejoin(_group_id: &str, _reason: &str) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_fetch_error(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offset_commit(_partitions: usize) {}

#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_callback_duration(_event: &'static str, _seconds: f64) {}
