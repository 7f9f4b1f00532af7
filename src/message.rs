//! Messages and fetched batches
//!
//! A [`Message`] is one immutable record as observed by a consumer; a
//! [`Batch`] is a contiguous run of messages fetched from a single
//! topic/partition, together with the broker's highwater mark at fetch time.
//! Per-partition errors reported inside a fetch response ride on the batch
//! (`Batch::error`) so the consume loop can decide how to react.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A topic/partition pair, the unit of assignment and offset tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition index within the topic
    pub partition: i32,
}

impl TopicPartition {
    /// Create a new topic/partition pair.
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self { topic: topic.into(), partition }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.topic, self.partition)
    }
}

/// One record fetched from a partition.
///
/// Within a single partition the offsets a consumer observes are strictly
/// increasing; across partitions no ordering is implied.
#[derive(Debug, Clone)]
pub struct Message {
    /// Topic the message was fetched from
    pub topic: String,
    /// Partition the message was fetched from
    pub partition: i32,
    /// Partition-scoped monotonic sequence number
    pub offset: i64,
    /// Optional message key
    pub key: Option<Bytes>,
    /// Message payload
    pub value: Bytes,
    /// Broker-assigned timestamp, when the broker recorded one
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// Create a message without broker metadata.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Bytes>,
        value: Bytes,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value,
            timestamp: None,
        }
    }

    /// The topic/partition this message belongs to.
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}

/// Broker-reported per-partition fetch error.
///
/// These arrive inside an otherwise successful fetch response and are
/// attached to the affected partition's [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionError {
    /// The contacted broker is no longer the partition leader.
    NotLeaderForPartition,
    /// The broker does not know the topic or partition.
    UnknownTopicOrPartition,
    /// The requested offset is outside the partition's log.
    OffsetOutOfRange,
    /// The partition has no elected leader right now.
    LeaderNotAvailable,
    /// Any other broker error code.
    Unknown(i16),
}

/// A contiguous run of messages from a single topic/partition.
///
/// A batch may be empty when the broker's wait time expired before
/// `min_bytes` accumulated; empty batches are skipped by the batch API.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Topic the batch was fetched from
    pub topic: String,
    /// Partition the batch was fetched from
    pub partition: i32,
    /// The broker's end-of-log offset for the partition at fetch time
    pub highwater_mark_offset: i64,
    /// Messages in offset order; all share `topic` and `partition`
    pub messages: Vec<Message>,
    /// Broker-reported error for this partition, if any
    pub error: Option<PartitionError>,
}

impl Batch {
    /// Create a batch of fetched messages.
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        highwater_mark_offset: i64,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            highwater_mark_offset,
            messages,
            error: None,
        }
    }

    /// Create an errored batch carrying no messages.
    pub fn with_error(topic: impl Into<String>, partition: i32, error: PartitionError) -> Self {
        Self {
            topic: topic.into(),
            partition,
            highwater_mark_offset: 0,
            messages: Vec::new(),
            error: Some(error),
        }
    }

    /// Whether the batch carries no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages in the batch.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Offset of the first message, if any.
    pub fn first_offset(&self) -> Option<i64> {
        self.messages.first().map(|m| m.offset)
    }

    /// Offset of the last message, if any.
    pub fn last_offset(&self) -> Option<i64> {
        self.messages.last().map(|m| m.offset)
    }

    /// How far the batch's tail lags behind the partition's end of log.
    ///
    /// Zero for an empty batch: no messages were returned, so there is
    /// nothing between the consumer and the highwater mark that this batch
    /// accounts for.
    pub fn offset_lag(&self) -> i64 {
        match self.last_offset() {
            Some(last) => (self.highwater_mark_offset - last - 1).max(0),
            None => 0,
        }
    }
}
