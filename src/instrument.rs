//! Instrumentation hook around user callbacks
//!
//! Every user callback runs inside an instrumentation scope so the sink can
//! observe both duration and failure. The sink itself is pluggable through
//! [`Instrumenter`]; the default [`TracingInstrumenter`] emits a `tracing`
//! span per callback and feeds the duration histogram when the `metrics`
//! feature is enabled.

use crate::error::Result;
use crate::metrics;
use bytes::Bytes;
use std::time::Instant;
use tracing::{debug_span, error, trace};

/// Event emitted around every per-message callback.
pub const PROCESS_MESSAGE: &str = "process_message.consumer";

/// Event emitted around every per-batch callback.
pub const PROCESS_BATCH: &str = "process_batch.consumer";

/// Attributes attached to an instrumentation event.
#[derive(Debug)]
pub enum EventPayload<'a> {
    /// One message is about to be handed to the user callback.
    Message {
        /// Topic of the message
        topic: &'a str,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// Distance between this message and the partition's end of log
        offset_lag: i64,
        /// Message key, if present
        key: Option<&'a Bytes>,
        /// Message payload
        value: &'a Bytes,
    },
    /// One non-empty batch is about to be handed to the user callback.
    Batch {
        /// Topic of the batch
        topic: &'a str,
        /// Partition of the batch
        partition: i32,
        /// Distance between the batch tail and the partition's end of log
        offset_lag: i64,
        /// The broker's end-of-log offset at fetch time
        highwater_mark_offset: i64,
        /// Number of messages in the batch
        message_count: usize,
    },
}

impl EventPayload<'_> {
    /// Topic the event concerns.
    pub fn topic(&self) -> &str {
        match self {
            EventPayload::Message { topic, .. } | EventPayload::Batch { topic, .. } => topic,
        }
    }

    /// Partition the event concerns.
    pub fn partition(&self) -> i32 {
        match self {
            EventPayload::Message { partition, .. } | EventPayload::Batch { partition, .. } => {
                *partition
            }
        }
    }
}

/// Sink for callback instrumentation.
///
/// `instrument` must invoke `f` exactly once, inside whatever scope the sink
/// establishes, and return `f`'s result unchanged. Failing callbacks are
/// observed through that result.
pub trait Instrumenter: Send + Sync {
    /// Run one user callback inside an instrumentation scope.
    fn instrument(
        &self,
        event: &'static str,
        payload: &EventPayload<'_>,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()>;
}

/// Default sink: a `tracing` span per callback plus duration metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInstrumenter;

impl Instrumenter for TracingInstrumenter {
    fn instrument(
        &self,
        event: &'static str,
        payload: &EventPayload<'_>,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let span = debug_span!(
            "consumer_event",
            event,
            topic = %payload.topic(),
            partition = payload.partition(),
        );
        let _guard = span.enter();

        let started = Instant::now();
        let result = f();
        let elapsed = started.elapsed();
        metrics::record_callback_duration(event, elapsed.as_secs_f64());

        match &result {
            Ok(()) => trace!(elapsed_us = elapsed.as_micros() as u64, "callback returned"),
            Err(err) => error!(error = %err, "callback failed"),
        }
        result
    }
}

/// Sink that drops every event. Useful when embedding the consumer in an
/// environment with its own tracing around the handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrumenter;

impl Instrumenter for NoopInstrumenter {
    fn instrument(
        &self,
        _event: &'static str,
        _payload: &EventPayload<'_>,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        f()
    }
}
