#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # streamtail
//!
//! A client-side, group-coordinated consumer for distributed, partitioned,
//! replicated commit logs.
//!
//! streamtail implements the hard half of a streaming consumer: the
//! distributed state machine that joins a named consumer group, survives
//! partition-assignment rebalances, drives long-running fetch loops over
//! its assigned partitions, checkpoints per-partition progress back to the
//! cluster, and keeps the coordinator session alive while user callbacks
//! run, without silently losing progress or reprocessing arbitrarily far
//! past its checkpoint.
//!
//! ## What lives here, what doesn't
//!
//! The crate contains the consume loop ([`Consumer`]), per-broker fetch
//! coalescing ([`fetch::FetchOperation`]), heartbeat scheduling
//! ([`heartbeat::Heartbeat`]), commit buffering
//! ([`offset::OffsetStore`]), and the error/recovery policy tying them
//! together. The wire protocol, metadata and connection pooling, the
//! join/sync sub-protocol, and offset storage RPCs stay behind the
//! [`Cluster`], [`Group`] and [`offset::OffsetBackend`] traits: bring
//! your own transport.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once**: a message is marked processed only after its
//!   callback returns success; a processed-but-uncommitted offset may be
//!   redelivered to the partition's next owner after a crash.
//! - **Per-partition FIFO**: within one partition, callbacks observe
//!   strictly increasing offsets. No ordering across partitions.
//! - **Bounded stop latency**: `stop()` is observed after the current
//!   callback and at the loop top; shutdown always commits outstanding
//!   offsets and leaves the group.
//!
//! ## Example
//!
//! ```rust,ignore
//! use streamtail::{
//!     Consumer, ConsumerConfig, FetchSettings, SubscriptionOptions,
//!     offset::OffsetStore,
//! };
//! use std::sync::Arc;
//!
//! let config = ConsumerConfig::new("billing-workers");
//! let cluster = Arc::new(my_transport::Cluster::connect(&brokers)?);
//! let group = my_transport::Membership::new(&config, Arc::clone(&cluster));
//! let offsets = OffsetStore::from_config(
//!     my_transport::OffsetRpc::new(Arc::clone(&cluster)),
//!     &config,
//! );
//!
//! let mut consumer = Consumer::new(config, cluster, group, offsets)?;
//! consumer.subscribe("invoices", SubscriptionOptions::earliest());
//! consumer.each_message(FetchSettings::default(), |message| {
//!     handle_invoice(message)?;
//!     Ok(())
//! })?;
//! ```

pub mod cluster;
pub mod config;
pub mod consumer;
pub mod error;
pub mod fetch;
pub mod group;
pub mod heartbeat;
pub mod instrument;
pub mod message;
pub mod metrics;
pub mod offset;

pub use cluster::{BrokerId, Cluster, FetchRequest, PartitionFetch};
pub use config::{ConsumerConfig, FetchSettings, SubscriptionOptions};
pub use consumer::{Consumer, HandlerResult, StopHandle};
pub use error::{Error, HandlerError, Recovery, Result};
pub use group::{Assignment, Group};
pub use instrument::{EventPayload, Instrumenter, TracingInstrumenter};
pub use message::{Batch, Message, PartitionError, TopicPartition};
pub use offset::{OffsetBackend, OffsetManager, OffsetStore, StartOffset};
