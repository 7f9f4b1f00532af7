//! Cluster metadata boundary
//!
//! The metadata layer (broker discovery, leader resolution, pooled
//! connections, and the wire codec) lives behind the [`Cluster`] trait.
//! The consumer core never touches sockets itself; it registers partitions
//! with a [`FetchOperation`](crate::fetch::FetchOperation), which resolves
//! leaders and issues one multiplexed fetch per broker through this trait.

use crate::error::Result;
use crate::message::Batch;
use std::time::Duration;

/// Broker node id, as assigned by the cluster.
pub type BrokerId = i32;

/// One partition's slot in a multiplexed fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFetch {
    /// Topic to fetch from
    pub topic: String,
    /// Partition index
    pub partition: i32,
    /// First offset to fetch
    pub offset: i64,
    /// Cap on bytes returned for this partition
    pub max_bytes: usize,
}

/// A fetch request aimed at a single broker, covering every partition that
/// broker currently leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Minimum bytes the broker should accumulate before answering
    pub min_bytes: usize,
    /// Longest the broker may block waiting for `min_bytes`
    pub max_wait: Duration,
    /// Partitions to fetch, all led by the addressed broker
    pub partitions: Vec<PartitionFetch>,
}

/// Access to cluster metadata and the fetch transport.
///
/// Implementations own connection pooling and metadata caching; shared
/// references are handed to the consumer and its fetch operations, so the
/// methods take `&self` and implementations use interior mutability where
/// they need it.
pub trait Cluster {
    /// Force a metadata refresh before the next leader lookup.
    ///
    /// Called by the consume loop after a failed fetch so the next iteration
    /// resolves leaders against fresh metadata.
    fn mark_as_stale(&self);

    /// Resolve the current leader broker for a partition.
    ///
    /// # Errors
    /// [`Error::LeaderNotAvailable`](crate::Error::LeaderNotAvailable) when
    /// the partition has no elected leader, or
    /// [`Error::Connection`](crate::Error::Connection) when metadata cannot
    /// be refreshed.
    fn leader_for(&self, topic: &str, partition: i32) -> Result<BrokerId>;

    /// Issue one multiplexed fetch against a broker.
    ///
    /// Returns one [`Batch`] per requested partition, empty when no data
    /// arrived within the request's wait budget. Broker-reported
    /// per-partition errors are attached to the corresponding batch rather
    /// than failing the whole call.
    ///
    /// # Errors
    /// [`Error::Connection`](crate::Error::Connection) on transport failure.
    fn fetch(&self, broker: BrokerId, request: &FetchRequest) -> Result<Vec<Batch>>;
}
