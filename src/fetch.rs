//! Fetch coalescing across brokers
//!
//! A consumer fetches many partitions per iteration, but partitions are
//! scattered across leader brokers. [`FetchOperation`] collects the
//! per-partition requests for one iteration, groups them by their current
//! leader, and issues a single multiplexed fetch per broker.

use crate::cluster::{BrokerId, Cluster, FetchRequest, PartitionFetch};
use crate::error::{Error, Result};
use crate::message::Batch;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One iteration's worth of partition fetches, executed broker by broker.
pub struct FetchOperation<'a, C: Cluster + ?Sized> {
    cluster: &'a C,
    min_bytes: usize,
    max_wait: Duration,
    pending: Vec<PartitionFetch>,
}

impl<'a, C: Cluster + ?Sized> FetchOperation<'a, C> {
    /// Start an empty operation with the caller's wait budget.
    pub fn new(cluster: &'a C, min_bytes: usize, max_wait: Duration) -> Self {
        Self { cluster, min_bytes, max_wait, pending: Vec::new() }
    }

    /// Register one partition in the pending request.
    pub fn fetch_from_partition(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: usize,
    ) {
        self.pending.push(PartitionFetch {
            topic: topic.to_string(),
            partition,
            offset,
            max_bytes,
        });
    }

    /// Number of partitions registered so far.
    pub fn partition_count(&self) -> usize {
        self.pending.len()
    }

    /// Resolve leaders, fetch once per broker, and return all batches in
    /// the order the brokers answered.
    ///
    /// Broker-reported per-partition errors stay attached to their batches;
    /// the caller decides how to react to those.
    ///
    /// # Errors
    /// - [`Error::Fetch`] when a connection fails or a leader cannot be
    ///   resolved; transport-level [`Error::Connection`] never escapes this
    ///   method unwrapped.
    /// - [`Error::LeaderNotAvailable`] unchanged, so the caller's backoff
    ///   policy applies.
    pub fn execute(self) -> Result<Vec<Batch>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_broker: BTreeMap<BrokerId, Vec<PartitionFetch>> = BTreeMap::new();
        for fetch in self.pending {
            let broker = self
                .cluster
                .leader_for(&fetch.topic, fetch.partition)
                .map_err(wrap_connection)?;
            by_broker.entry(broker).or_default().push(fetch);
        }

        let mut batches = Vec::new();
        for (broker, partitions) in by_broker {
            debug!(broker, partitions = partitions.len(), "fetching from broker");
            let request = FetchRequest {
                min_bytes: self.min_bytes,
                max_wait: self.max_wait,
                partitions,
            };
            let fetched = self.cluster.fetch(broker, &request).map_err(wrap_connection)?;
            batches.extend(fetched);
        }
        Ok(batches)
    }
}

fn wrap_connection(err: Error) -> Error {
    match err {
        Error::Connection(msg) => Error::Fetch(msg),
        other => other,
    }
}
