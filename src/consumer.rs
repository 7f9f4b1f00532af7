//! Group-coordinated consume loop
//!
//! [`Consumer`] joins a named consumer group, drives long-running fetches
//! over its assigned partitions, hands every message (or batch) to a user
//! callback, checkpoints progress through the
//! [`OffsetManager`](crate::offset::OffsetManager), and keeps the session
//! alive with interleaved heartbeats.
//!
//! # Loop shape
//!
//! ```text
//! join group ──▶ fetch ──▶ dispatch callbacks ──▶ commit-if-due ──▶ fetch …
//!     ▲                      │ per message: mark processed,
//!     │                      │ commit-if-due, heartbeat, stop check
//!     └── recoverable errors (heartbeat/commit: rejoin;
//!         fetch: mark metadata stale; no leader: wait 1 s)
//! ```
//!
//! On every exit path, whether graceful stop, handler failure, or fatal
//! error, the shutdown tail commits outstanding offsets and leaves the
//! group, so partitions are handed over promptly and without losing acked
//! progress.
//!
//! Delivery is at-least-once: a message whose callback returned but whose
//! offset was not yet committed may be redelivered to the partition's next
//! owner. Per-partition order is preserved; cross-partition order is not.

use crate::cluster::Cluster;
use crate::config::{ConsumerConfig, FetchSettings, SubscriptionOptions};
use crate::error::{Error, HandlerError, Recovery, Result};
use crate::fetch::FetchOperation;
use crate::group::Group;
use crate::heartbeat::Heartbeat;
use crate::instrument::{
    EventPayload, Instrumenter, TracingInstrumenter, PROCESS_BATCH, PROCESS_MESSAGE,
};
use crate::message::{Batch, Message, PartitionError};
use crate::metrics;
use crate::offset::OffsetManager;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Pause before refetching when a partition has no elected leader.
const LEADER_BACKOFF: Duration = Duration::from_secs(1);

/// Phase of the consume loop, tracked for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining,
    Fetching,
    Dispatching,
    Recovering,
    Stopping,
    Left,
}

/// Cloneable handle requesting a graceful stop of a running consume loop.
///
/// The flag is observed at two points: after each message/batch callback
/// and at the top of the outer loop, so stop latency is bounded by one
/// in-flight callback plus the shutdown tail.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop at the next safe point. Non-blocking.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Outcome of the user callback for one message or one batch.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// A group-coordinated consumer over a partitioned commit log.
///
/// The consumer composes three caller-provided collaborators: the
/// [`Cluster`] metadata/transport layer (shared), the [`Group`] membership
/// protocol, and an [`OffsetManager`] for progress. It owns no sockets and
/// performs no I/O beyond what those collaborators do on its behalf.
///
/// # Example
///
/// ```rust,ignore
/// use streamtail::{Consumer, ConsumerConfig, FetchSettings, SubscriptionOptions};
///
/// let config = ConsumerConfig::new("invoice-workers");
/// let mut consumer = Consumer::new(config, cluster, group, offsets)?;
/// consumer.subscribe("invoices", SubscriptionOptions::earliest());
///
/// let handle = consumer.stop_handle();
/// std::thread::spawn(move || {
///     wait_for_shutdown_signal();
///     handle.stop();
/// });
///
/// consumer.each_message(FetchSettings::default(), |message| {
///     println!("{}/{}@{}", message.topic, message.partition, message.offset);
///     Ok(())
/// })?;
/// ```
pub struct Consumer<C: Cluster, G: Group, O: OffsetManager> {
    config: ConsumerConfig,
    cluster: Arc<C>,
    group: G,
    offsets: O,
    heartbeat: Heartbeat,
    instrumenter: Arc<dyn Instrumenter>,
    running: Arc<AtomicBool>,
    subscriptions: HashMap<String, SubscriptionOptions>,
    phase: Phase,
}

impl<C: Cluster, G: Group, O: OffsetManager> Consumer<C, G, O> {
    /// Create a consumer from its configuration and collaborators.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the configuration is invalid.
    pub fn new(config: ConsumerConfig, cluster: Arc<C>, group: G, offsets: O) -> Result<Self> {
        config.validate()?;
        let heartbeat = Heartbeat::new(config.heartbeat_interval);
        Ok(Self {
            config,
            cluster,
            group,
            offsets,
            heartbeat,
            instrumenter: Arc::new(TracingInstrumenter),
            running: Arc::new(AtomicBool::new(false)),
            subscriptions: HashMap::new(),
            phase: Phase::Idle,
        })
    }

    /// Replace the instrumentation sink.
    pub fn with_instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = instrumenter;
        self
    }

    /// Add a topic to the group subscription.
    ///
    /// Idempotent per topic; calling again replaces the options. The
    /// subscription reaches the coordinator at the next join, so a
    /// subscribe issued while the loop is already running only takes
    /// effect at the next rebalance.
    pub fn subscribe(&mut self, topic: &str, options: SubscriptionOptions) {
        self.group.subscribe(topic);
        self.offsets.set_default_offset(topic, options.start_offset);
        self.subscriptions.insert(topic.to_string(), options);
        info!(
            topic,
            start_offset = ?options.start_offset,
            max_bytes = options.max_bytes_per_partition,
            "subscribed to topic"
        );
    }

    /// Request a graceful stop at the next safe point. Non-blocking.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// A cloneable, `Send` handle for stopping the loop from elsewhere.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { running: Arc::clone(&self.running) }
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn transition(&mut self, next: Phase) {
        if self.phase != next {
            trace!(from = ?self.phase, to = ?next, "consumer phase");
            self.phase = next;
        }
    }

    /// Run the consume loop, invoking `handler` once per fetched message.
    ///
    /// Returns when [`stop`](Consumer::stop) is observed (with `Ok`) or an
    /// unrecoverable error occurs (with that error, after the shutdown
    /// tail). Messages within one partition arrive in strictly increasing
    /// offset order.
    ///
    /// # Errors
    /// The first unrecoverable error, including a handler failure wrapped
    /// as [`Error::Processing`].
    pub fn each_message<F>(&mut self, settings: FetchSettings, mut handler: F) -> Result<()>
    where
        F: FnMut(&Message) -> HandlerResult,
    {
        self.running.store(true, Ordering::SeqCst);
        info!(group_id = %self.config.group_id, "starting message consumption");
        let outcome = self.run_loop(&settings, &mut |consumer, batches| {
            consumer.dispatch_messages(batches, &mut handler)
        });
        self.shutdown_tail(outcome)
    }

    /// Run the consume loop, invoking `handler` once per non-empty batch.
    ///
    /// Empty batches (normal when the broker's wait expires before
    /// `min_bytes` accumulate) are skipped silently. On success the last
    /// offset of the batch is marked processed.
    ///
    /// # Errors
    /// As [`each_message`](Consumer::each_message).
    pub fn each_batch<F>(&mut self, settings: FetchSettings, mut handler: F) -> Result<()>
    where
        F: FnMut(&Batch) -> HandlerResult,
    {
        self.running.store(true, Ordering::SeqCst);
        info!(group_id = %self.config.group_id, "starting batch consumption");
        let outcome = self.run_loop(&settings, &mut |consumer, batches| {
            consumer.dispatch_batches(batches, &mut handler)
        });
        self.shutdown_tail(outcome)
    }

    /// The outer loop: fetch, dispatch, absorb recoverable errors.
    fn run_loop(
        &mut self,
        settings: &FetchSettings,
        dispatch: &mut dyn FnMut(&mut Self, Vec<Batch>) -> Result<()>,
    ) -> Result<()> {
        while self.running() {
            if let Err(err) = self.iteration(settings, dispatch) {
                self.recover(err)?;
            }
        }
        Ok(())
    }

    /// One fetch → dispatch → commit-check cycle.
    fn iteration(
        &mut self,
        settings: &FetchSettings,
        dispatch: &mut dyn FnMut(&mut Self, Vec<Batch>) -> Result<()>,
    ) -> Result<()> {
        let batches = self.fetch_batches(settings)?;
        dispatch(&mut *self, batches)?;
        // push offsets acked late in the previous iteration even when this
        // one delivered nothing
        self.offsets.commit_offsets_if_necessary()
    }

    /// Dispatch every message of every batch, in fetch order.
    fn dispatch_messages(
        &mut self,
        batches: Vec<Batch>,
        handler: &mut dyn FnMut(&Message) -> HandlerResult,
    ) -> Result<()> {
        self.transition(Phase::Dispatching);
        for batch in &batches {
            debug!(
                topic = %batch.topic,
                partition = batch.partition,
                messages = batch.message_count(),
                offset_lag = batch.offset_lag(),
                "dispatching batch"
            );
            for message in &batch.messages {
                let payload = EventPayload::Message {
                    topic: &message.topic,
                    partition: message.partition,
                    offset: message.offset,
                    offset_lag: (batch.highwater_mark_offset - message.offset - 1).max(0),
                    key: message.key.as_ref(),
                    value: &message.value,
                };
                let mut invoke = || {
                    handler(message).map_err(|source| Error::Processing {
                        topic: message.topic.clone(),
                        partition: message.partition,
                        offset: message.offset,
                        source,
                    })
                };
                self.instrumenter.instrument(PROCESS_MESSAGE, &payload, &mut invoke)?;

                self.offsets.mark_as_processed(&message.topic, message.partition, message.offset);
                metrics::record_message_processed(&message.topic, message.partition);
                self.offsets.commit_offsets_if_necessary()?;
                self.heartbeat.send_if_necessary(&mut self.group)?;

                if !self.running() {
                    self.transition(Phase::Stopping);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Dispatch every non-empty batch.
    fn dispatch_batches(
        &mut self,
        batches: Vec<Batch>,
        handler: &mut dyn FnMut(&Batch) -> HandlerResult,
    ) -> Result<()> {
        self.transition(Phase::Dispatching);
        for batch in &batches {
            let Some(last_offset) = batch.last_offset() else {
                continue;
            };
            let payload = EventPayload::Batch {
                topic: &batch.topic,
                partition: batch.partition,
                offset_lag: batch.offset_lag(),
                highwater_mark_offset: batch.highwater_mark_offset,
                message_count: batch.message_count(),
            };
            let mut invoke = || {
                handler(batch).map_err(|source| Error::Processing {
                    topic: batch.topic.clone(),
                    partition: batch.partition,
                    offset: last_offset,
                    source,
                })
            };
            self.instrumenter.instrument(PROCESS_BATCH, &payload, &mut invoke)?;

            self.offsets.mark_as_processed(&batch.topic, batch.partition, last_offset);
            metrics::record_batch_processed(&batch.topic, batch.partition, batch.message_count());
            self.offsets.commit_offsets_if_necessary()?;
            self.heartbeat.send_if_necessary(&mut self.group)?;

            if !self.running() {
                self.transition(Phase::Stopping);
                return Ok(());
            }
        }
        Ok(())
    }

    /// Build and execute one multi-partition fetch from current offsets.
    ///
    /// Out-of-range offsets are reset to the topic's seed policy and the
    /// fetch is retried; other broker-reported partition errors surface so
    /// the loop's recovery policy applies.
    fn fetch_batches(&mut self, settings: &FetchSettings) -> Result<Vec<Batch>> {
        if !self.group.is_member() {
            self.join_group()?;
        }
        self.transition(Phase::Fetching);
        self.heartbeat.send_if_necessary(&mut self.group)?;

        let assignment = self.group.assigned_partitions();
        if assignment.is_empty() {
            return Err(Error::NoPartitionsAssigned);
        }

        loop {
            let mut operation =
                FetchOperation::new(self.cluster.as_ref(), settings.min_bytes, settings.max_wait);
            for (topic, partitions) in assignment.iter() {
                let max_bytes = self
                    .subscriptions
                    .get(topic)
                    .map_or(crate::config::DEFAULT_MAX_BYTES_PER_PARTITION, |options| {
                        options.max_bytes_per_partition
                    });
                for &partition in partitions {
                    let offset = self.offsets.next_offset_for(topic, partition)?;
                    operation.fetch_from_partition(topic, partition, offset, max_bytes);
                }
            }
            let batches = operation.execute()?;

            let mut reseeds = Vec::new();
            for batch in &batches {
                match batch.error {
                    None => {}
                    Some(PartitionError::OffsetOutOfRange) => {
                        reseeds.push((batch.topic.clone(), batch.partition));
                    }
                    Some(PartitionError::LeaderNotAvailable) => {
                        return Err(Error::LeaderNotAvailable {
                            topic: batch.topic.clone(),
                            partition: batch.partition,
                        });
                    }
                    Some(PartitionError::NotLeaderForPartition)
                    | Some(PartitionError::UnknownTopicOrPartition) => {
                        return Err(Error::Fetch(format!(
                            "broker reported {:?} for {}/{}",
                            batch.error, batch.topic, batch.partition
                        )));
                    }
                    Some(PartitionError::Unknown(code)) => {
                        return Err(Error::Fetch(format!(
                            "broker error code {code} for {}/{}",
                            batch.topic, batch.partition
                        )));
                    }
                }
            }
            if reseeds.is_empty() {
                return Ok(batches);
            }
            for (topic, partition) in reseeds {
                warn!(topic = %topic, partition, "offset out of range, resetting to seed policy");
                self.offsets.seek_to_default(&topic, partition)?;
            }
        }
    }

    /// Join the group and reconcile local offsets with the new generation.
    ///
    /// A member continuously present across a rebalance (generation bumped
    /// by exactly one, or first join) keeps its offsets for partitions it
    /// still owns. A member that missed a whole generation discards all
    /// local offsets: its former partitions have been consumed by others,
    /// and the coordinator's committed offsets are the only truth left.
    fn join_group(&mut self) -> Result<()> {
        self.transition(Phase::Joining);
        let previous_generation = self.group.generation_id();
        self.group.join()?;
        let generation = self.group.generation_id();
        let assignment = self.group.assigned_partitions();
        info!(
            group_id = %self.config.group_id,
            generation = ?generation,
            partitions = assignment.partition_count(),
            "joined consumer group"
        );

        match previous_generation {
            Some(old) if generation != Some(old + 1) => {
                warn!(
                    previous_generation = old,
                    generation = ?generation,
                    "missed at least one generation, discarding local offsets"
                );
                metrics::record_group_rejoin(&self.config.group_id, "missed_generation");
                self.offsets.clear_offsets();
            }
            _ => {
                self.offsets.clear_offsets_excluding(&assignment);
            }
        }
        self.heartbeat.reset();
        Ok(())
    }

    /// Absorb a recoverable error, or return it when the loop must die.
    fn recover(&mut self, err: Error) -> Result<()> {
        self.transition(Phase::Recovering);
        match err.recovery() {
            Recovery::Rejoin => {
                warn!(error = %err, "group session error, rejoining");
                metrics::record_group_rejoin(&self.config.group_id, "session_error");
                if self.running() {
                    self.join_group()?;
                }
                Ok(())
            }
            Recovery::RefreshMetadata => {
                warn!(error = %err, "fetch failed, marking cluster metadata as stale");
                metrics::record_fetch_error("fetch");
                self.cluster.mark_as_stale();
                Ok(())
            }
            Recovery::AwaitLeader => {
                warn!(error = %err, backoff = ?LEADER_BACKOFF, "leader not available, backing off");
                metrics::record_fetch_error("leader_not_available");
                self.cluster.mark_as_stale();
                thread::sleep(LEADER_BACKOFF);
                Ok(())
            }
            Recovery::Fatal => Err(err),
        }
    }

    /// Commit outstanding offsets and leave the group. Runs on every exit
    /// path; failures here are logged and never mask the loop's outcome.
    fn shutdown_tail(&mut self, outcome: Result<()>) -> Result<()> {
        self.transition(Phase::Stopping);
        if let Err(commit_err) = self.offsets.commit_offsets() {
            error!(error = %commit_err, "final offset commit failed during shutdown");
        }
        if let Err(leave_err) = self.group.leave() {
            error!(error = %leave_err, "leaving the consumer group failed during shutdown");
        }
        self.running.store(false, Ordering::SeqCst);
        self.transition(Phase::Left);
        match &outcome {
            Ok(()) => info!(group_id = %self.config.group_id, "consumer stopped"),
            Err(err) => {
                error!(group_id = %self.config.group_id, error = %err, "consumer failed")
            }
        }
        outcome
    }
}
