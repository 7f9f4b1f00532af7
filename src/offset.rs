//! Offset tracking and commit buffering
//!
//! The consumer observes per-partition progress through the
//! [`OffsetManager`] trait: the offset the next fetch should request, and
//! the offset the coordinator has durably acknowledged. The invariant
//! `committed <= next` holds at all times; a commit never outruns what the
//! user callback has acknowledged.
//!
//! [`OffsetStore`] is the provided implementation. It buffers processed
//! offsets locally and pushes them to the coordinator either when the
//! commit interval elapses or when enough messages have accumulated. The
//! wire sub-protocol (reading committed offsets, resolving log bounds,
//! writing commits) stays behind [`OffsetBackend`].
//!
//! Offsets follow the resume-point convention throughout: a committed value
//! of `n` means "everything below `n` is processed, fetch from `n` next".

use crate::error::{Error, Result};
use crate::group::Assignment;
use crate::message::TopicPartition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Where to begin consuming a partition that has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Start from the beginning of the partition's log.
    Earliest,
    /// Start from the end of the log, consuming only new writes.
    Latest,
}

/// Progress bookkeeping for the partitions a member consumes.
pub trait OffsetManager {
    /// Record the seed policy used for partitions of `topic` that have no
    /// committed offset.
    fn set_default_offset(&mut self, topic: &str, start: StartOffset);

    /// The offset the next fetch of this partition should request.
    ///
    /// # Errors
    /// Propagates backend failures from reading the committed offset or
    /// resolving the seed policy.
    fn next_offset_for(&mut self, topic: &str, partition: i32) -> Result<i64>;

    /// Reset the partition to its seed policy, discarding local progress.
    ///
    /// # Errors
    /// Propagates backend failures from resolving the log bounds.
    fn seek_to_default(&mut self, topic: &str, partition: i32) -> Result<()>;

    /// Mark `offset` as processed; the next fetch requests `offset + 1`.
    fn mark_as_processed(&mut self, topic: &str, partition: i32, offset: i64);

    /// Commit buffered offsets if the commit interval has elapsed or the
    /// pending count crossed the threshold; a no-op otherwise.
    ///
    /// # Errors
    /// [`Error::OffsetCommit`] when the coordinator rejects the commit.
    fn commit_offsets_if_necessary(&mut self) -> Result<()>;

    /// Unconditionally commit all buffered offsets. Used on shutdown.
    ///
    /// # Errors
    /// [`Error::OffsetCommit`] when the coordinator rejects the commit.
    fn commit_offsets(&mut self) -> Result<()>;

    /// Drop all local offset state.
    fn clear_offsets(&mut self);

    /// Drop local offset state for every partition outside `assignment`.
    fn clear_offsets_excluding(&mut self, assignment: &Assignment);
}

/// The offset-storage wire sub-protocol.
///
/// Implementations talk to the group coordinator (committed offsets) and to
/// partition leaders (log bounds); the store above them never does I/O of
/// its own.
pub trait OffsetBackend {
    /// The committed resume point for the partition, if one exists.
    ///
    /// # Errors
    /// [`Error::Connection`] or [`Error::Group`] when the coordinator
    /// cannot be reached.
    fn committed_offset(&mut self, tp: &TopicPartition) -> Result<Option<i64>>;

    /// Resolve a seed policy against the partition's current log bounds.
    ///
    /// # Errors
    /// [`Error::Connection`] when the partition leader cannot be reached.
    fn resolve_start_offset(
        &mut self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<i64>;

    /// Durably commit the given resume points.
    ///
    /// # Errors
    /// Any error; the store wraps it into [`Error::OffsetCommit`].
    fn commit(&mut self, offsets: &HashMap<TopicPartition, i64>) -> Result<()>;
}

/// Buffering [`OffsetManager`] over an [`OffsetBackend`].
#[derive(Debug)]
pub struct OffsetStore<B> {
    backend: B,
    commit_interval: Duration,
    commit_threshold: usize,
    default_offsets: HashMap<String, StartOffset>,
    next_offsets: HashMap<TopicPartition, i64>,
    committed_offsets: HashMap<TopicPartition, i64>,
    uncommitted_count: usize,
    last_commit: Instant,
}

impl<B: OffsetBackend> OffsetStore<B> {
    /// Create a store committing every `commit_interval`, or as soon as
    /// `commit_threshold` processed messages are pending (0 disables the
    /// count trigger).
    pub fn new(backend: B, commit_interval: Duration, commit_threshold: usize) -> Self {
        Self {
            backend,
            commit_interval,
            commit_threshold,
            default_offsets: HashMap::new(),
            next_offsets: HashMap::new(),
            committed_offsets: HashMap::new(),
            uncommitted_count: 0,
            last_commit: Instant::now(),
        }
    }

    /// Create a store using the commit cadence from `config`.
    pub fn from_config(backend: B, config: &crate::config::ConsumerConfig) -> Self {
        Self::new(backend, config.offset_commit_interval, config.offset_commit_threshold)
    }

    /// Access the wire backend, e.g. for inspection in tests.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn default_offset_for(&self, topic: &str) -> StartOffset {
        self.default_offsets.get(topic).copied().unwrap_or(StartOffset::Earliest)
    }

    fn offsets_to_commit(&self) -> HashMap<TopicPartition, i64> {
        self.next_offsets
            .iter()
            .filter(|(tp, next)| self.committed_offsets.get(tp) != Some(next))
            .map(|(tp, next)| (tp.clone(), *next))
            .collect()
    }

    fn commit_timeout_reached(&self) -> bool {
        !self.commit_interval.is_zero() && self.last_commit.elapsed() >= self.commit_interval
    }

    fn commit_threshold_reached(&self) -> bool {
        self.commit_threshold != 0 && self.uncommitted_count >= self.commit_threshold
    }
}

impl<B: OffsetBackend> OffsetManager for OffsetStore<B> {
    fn set_default_offset(&mut self, topic: &str, start: StartOffset) {
        self.default_offsets.insert(topic.to_string(), start);
    }

    fn next_offset_for(&mut self, topic: &str, partition: i32) -> Result<i64> {
        let tp = TopicPartition::new(topic, partition);
        if let Some(next) = self.next_offsets.get(&tp) {
            return Ok(*next);
        }

        let next = match self.backend.committed_offset(&tp)? {
            Some(committed) => {
                self.committed_offsets.insert(tp.clone(), committed);
                committed
            }
            // Never consumed by this group: resolve the seed policy once and
            // pin it locally, so writes racing the first fetch are not lost
            // under a `latest` seed.
            None => {
                let start = self.default_offset_for(topic);
                let resolved = self.backend.resolve_start_offset(topic, partition, start)?;
                debug!(topic, partition, ?start, offset = resolved, "seeded partition offset");
                resolved
            }
        };
        self.next_offsets.insert(tp, next);
        Ok(next)
    }

    fn seek_to_default(&mut self, topic: &str, partition: i32) -> Result<()> {
        let start = self.default_offset_for(topic);
        let resolved = self.backend.resolve_start_offset(topic, partition, start)?;
        debug!(topic, partition, ?start, offset = resolved, "reset partition to seed offset");
        self.next_offsets.insert(TopicPartition::new(topic, partition), resolved);
        Ok(())
    }

    fn mark_as_processed(&mut self, topic: &str, partition: i32, offset: i64) {
        self.uncommitted_count += 1;
        self.next_offsets.insert(TopicPartition::new(topic, partition), offset + 1);
    }

    fn commit_offsets_if_necessary(&mut self) -> Result<()> {
        if self.commit_timeout_reached() || self.commit_threshold_reached() {
            self.commit_offsets()?;
        }
        Ok(())
    }

    fn commit_offsets(&mut self) -> Result<()> {
        let pending = self.offsets_to_commit();
        if pending.is_empty() {
            return Ok(());
        }
        self.backend.commit(&pending).map_err(|err| match err {
            already @ Error::OffsetCommit(_) => already,
            other => Error::OffsetCommit(other.to_string()),
        })?;
        debug!(partitions = pending.len(), "committed offsets");
        crate::metrics::record_offset_commit(pending.len());
        self.committed_offsets.extend(pending);
        self.last_commit = Instant::now();
        self.uncommitted_count = 0;
        Ok(())
    }

    fn clear_offsets(&mut self) {
        self.next_offsets.clear();
        self.committed_offsets.clear();
        self.uncommitted_count = 0;
    }

    fn clear_offsets_excluding(&mut self, assignment: &Assignment) {
        self.next_offsets.retain(|tp, _| assignment.contains(&tp.topic, tp.partition));
        self.committed_offsets.retain(|tp, _| assignment.contains(&tp.topic, tp.partition));
    }
}
