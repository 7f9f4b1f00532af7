//! Shared in-memory fixtures for consumer integration tests
//!
//! The fixtures stand in for the three out-of-crate collaborators: an
//! in-memory cluster with per-partition logs and fault injection, a group
//! whose join outcomes are scripted per test, and an offset backend that
//! records every commit. State lives behind `Arc<Mutex<_>>` so tests keep
//! a handle while the consumer owns the collaborator.

#![allow(dead_code)]

use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use streamtail::cluster::{BrokerId, Cluster, FetchRequest};
use streamtail::error::{Error, Result};
use streamtail::group::{Assignment, Group};
use streamtail::instrument::{EventPayload, Instrumenter};
use streamtail::message::{Batch, Message, PartitionError, TopicPartition};
use streamtail::offset::{OffsetBackend, OffsetStore, StartOffset};
use streamtail::{Consumer, ConsumerConfig};
use uuid::Uuid;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Build an assignment from `(topic, partition)` pairs.
pub fn assignment(pairs: &[(&str, i32)]) -> Assignment {
    pairs.iter().map(|(topic, partition)| (*topic, *partition)).collect()
}

/// Assert a delivered-offset sequence is strictly increasing.
pub fn assert_monotonic(offsets: &[i64]) {
    for window in offsets.windows(2) {
        assert!(
            window[0] < window[1],
            "offsets not strictly increasing: {offsets:?}"
        );
    }
}

// ============================================================================
// Cluster
// ============================================================================

/// Backing state of the in-memory cluster.
#[derive(Default)]
pub struct ClusterState {
    /// Per-partition logs; a message's offset is its index
    pub logs: HashMap<TopicPartition, Vec<Bytes>>,
    /// Leader overrides; unlisted partitions are led by broker 0
    pub leaders: HashMap<TopicPartition, BrokerId>,
    /// Times `mark_as_stale` was called
    pub stale_marks: usize,
    /// Completed fetch calls
    pub fetch_count: usize,
    /// One-shot broker-reported errors, consumed per fetch
    pub partition_faults: HashMap<TopicPartition, VecDeque<PartitionError>>,
    /// Fail this many upcoming fetch calls at the transport level
    pub connection_faults: usize,
    /// Values appended once `fetch_count` reaches the trigger
    pub deferred_writes: Vec<(usize, TopicPartition, Vec<Bytes>)>,
}

/// In-memory [`Cluster`] with scripted faults.
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(ClusterState::default())) }
    }

    pub fn handle(&self) -> Arc<Mutex<ClusterState>> {
        Arc::clone(&self.state)
    }

    /// Append `count` generated values to the partition's log.
    pub fn produce(&self, topic: &str, partition: i32, count: usize) {
        let mut state = self.state.lock();
        let log = state.logs.entry(TopicPartition::new(topic, partition)).or_default();
        for _ in 0..count {
            log.push(Bytes::from(format!("value-{}", log.len())));
        }
    }

    /// Append values once the given number of fetches has completed.
    pub fn produce_after_fetches(&self, fetches: usize, topic: &str, partition: i32, count: usize) {
        let values = (0..count).map(|i| Bytes::from(format!("value-{i}"))).collect();
        self.state.lock().deferred_writes.push((
            fetches,
            TopicPartition::new(topic, partition),
            values,
        ));
    }

    /// Queue a one-shot broker-reported error for the partition.
    pub fn inject_partition_fault(&self, topic: &str, partition: i32, fault: PartitionError) {
        self.state
            .lock()
            .partition_faults
            .entry(TopicPartition::new(topic, partition))
            .or_default()
            .push_back(fault);
    }
}

impl Cluster for InMemoryCluster {
    fn mark_as_stale(&self) {
        self.state.lock().stale_marks += 1;
    }

    fn leader_for(&self, topic: &str, partition: i32) -> Result<BrokerId> {
        let state = self.state.lock();
        Ok(state
            .leaders
            .get(&TopicPartition::new(topic, partition))
            .copied()
            .unwrap_or(0))
    }

    fn fetch(&self, _broker: BrokerId, request: &FetchRequest) -> Result<Vec<Batch>> {
        let mut state = self.state.lock();
        state.fetch_count += 1;

        // apply writes whose trigger fetch has been reached
        let reached = state.fetch_count;
        let mut due = Vec::new();
        state.deferred_writes.retain(|(trigger, tp, values)| {
            if *trigger <= reached {
                due.push((tp.clone(), values.clone()));
                false
            } else {
                true
            }
        });
        for (tp, values) in due {
            state.logs.entry(tp).or_default().extend(values);
        }

        if state.connection_faults > 0 {
            state.connection_faults -= 1;
            return Err(Error::Connection("injected transport failure".into()));
        }

        let mut batches = Vec::new();
        for slot in &request.partitions {
            let tp = TopicPartition::new(&slot.topic, slot.partition);

            if let Some(fault) =
                state.partition_faults.get_mut(&tp).and_then(VecDeque::pop_front)
            {
                batches.push(Batch::with_error(slot.topic.clone(), slot.partition, fault));
                continue;
            }

            let log = state.logs.get(&tp).map(Vec::as_slice).unwrap_or(&[]);
            let highwater = log.len() as i64;
            if slot.offset < 0 || slot.offset > highwater {
                batches.push(Batch::with_error(
                    slot.topic.clone(),
                    slot.partition,
                    PartitionError::OffsetOutOfRange,
                ));
                continue;
            }

            let mut budget = slot.max_bytes;
            let mut messages = Vec::new();
            for (index, value) in log.iter().enumerate().skip(slot.offset as usize) {
                if value.len() > budget && !messages.is_empty() {
                    break;
                }
                budget = budget.saturating_sub(value.len());
                messages.push(Message {
                    topic: slot.topic.clone(),
                    partition: slot.partition,
                    offset: index as i64,
                    key: None,
                    value: value.clone(),
                    timestamp: Some(Utc::now()),
                });
            }
            batches.push(Batch::new(slot.topic.clone(), slot.partition, highwater, messages));
        }
        Ok(batches)
    }
}

// ============================================================================
// Group
// ============================================================================

/// Backing state of the scripted group.
pub struct GroupState {
    pub member_id: String,
    pub subscribed: Vec<String>,
    pub member: bool,
    pub generation: Option<i32>,
    pub assignment: Assignment,
    /// Outcomes handed out by successive joins
    pub joins: VecDeque<(i32, Assignment)>,
    pub join_count: usize,
    pub leave_count: usize,
    pub heartbeat_count: usize,
    /// Fail this many upcoming heartbeats
    pub heartbeat_faults: usize,
}

impl Default for GroupState {
    fn default() -> Self {
        Self {
            member_id: format!("member-{}", Uuid::new_v4()),
            subscribed: Vec::new(),
            member: false,
            generation: None,
            assignment: Assignment::empty(),
            joins: VecDeque::new(),
            join_count: 0,
            leave_count: 0,
            heartbeat_count: 0,
            heartbeat_faults: 0,
        }
    }
}

/// [`Group`] whose join outcomes are scripted per test.
pub struct ScriptedGroup {
    state: Arc<Mutex<GroupState>>,
}

impl ScriptedGroup {
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(GroupState::default())) }
    }

    pub fn handle(&self) -> Arc<Mutex<GroupState>> {
        Arc::clone(&self.state)
    }

    /// Queue the outcome of the next join.
    pub fn script_join(&self, generation: i32, assignment: Assignment) {
        self.state.lock().joins.push_back((generation, assignment));
    }
}

impl Group for ScriptedGroup {
    fn subscribe(&mut self, topic: &str) {
        self.state.lock().subscribed.push(topic.to_string());
    }

    fn join(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        let (generation, assignment) = state
            .joins
            .pop_front()
            .ok_or_else(|| Error::Group("no join outcome scripted".into()))?;
        state.member = true;
        state.generation = Some(generation);
        state.assignment = assignment;
        state.join_count += 1;
        Ok(())
    }

    fn leave(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.member = false;
        state.leave_count += 1;
        Ok(())
    }

    fn is_member(&self) -> bool {
        self.state.lock().member
    }

    fn generation_id(&self) -> Option<i32> {
        self.state.lock().generation
    }

    fn assigned_partitions(&self) -> Assignment {
        self.state.lock().assignment.clone()
    }

    fn heartbeat(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.heartbeat_faults > 0 {
            state.heartbeat_faults -= 1;
            return Err(Error::Heartbeat("session expired".into()));
        }
        state.heartbeat_count += 1;
        Ok(())
    }
}

// ============================================================================
// Offset backend
// ============================================================================

/// Backing state of the in-memory offset backend.
#[derive(Default)]
pub struct BackendState {
    pub committed: HashMap<TopicPartition, i64>,
    pub commit_count: usize,
    /// Fail this many upcoming commits
    pub commit_faults: usize,
}

/// [`OffsetBackend`] committing into shared memory and resolving seed
/// policies against the in-memory cluster's logs.
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    cluster: Arc<Mutex<ClusterState>>,
}

impl InMemoryBackend {
    pub fn new(cluster: Arc<Mutex<ClusterState>>) -> Self {
        Self { state: Arc::new(Mutex::new(BackendState::default())), cluster }
    }

    pub fn handle(&self) -> Arc<Mutex<BackendState>> {
        Arc::clone(&self.state)
    }
}

impl OffsetBackend for InMemoryBackend {
    fn committed_offset(&mut self, tp: &TopicPartition) -> Result<Option<i64>> {
        Ok(self.state.lock().committed.get(tp).copied())
    }

    fn resolve_start_offset(
        &mut self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<i64> {
        match start {
            StartOffset::Earliest => Ok(0),
            StartOffset::Latest => {
                let cluster = self.cluster.lock();
                Ok(cluster
                    .logs
                    .get(&TopicPartition::new(topic, partition))
                    .map_or(0, |log| log.len() as i64))
            }
        }
    }

    fn commit(&mut self, offsets: &HashMap<TopicPartition, i64>) -> Result<()> {
        let mut state = self.state.lock();
        if state.commit_faults > 0 {
            state.commit_faults -= 1;
            return Err(Error::Group("stale generation".into()));
        }
        state
            .committed
            .extend(offsets.iter().map(|(tp, offset)| (tp.clone(), *offset)));
        state.commit_count += 1;
        Ok(())
    }
}

// ============================================================================
// Instrumentation recorder
// ============================================================================

/// One observed callback invocation.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event: &'static str,
    pub topic: String,
    pub partition: i32,
    /// Message offset for per-message events, `None` for batch events
    pub offset: Option<i64>,
}

/// [`Instrumenter`] that records every callback invocation.
#[derive(Clone, Default)]
pub struct RecordingInstrumenter {
    pub events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingInstrumenter {
    /// Offsets delivered to per-message callbacks for one partition.
    pub fn message_offsets(&self, topic: &str, partition: i32) -> Vec<i64> {
        self.events
            .lock()
            .iter()
            .filter(|e| {
                e.event == streamtail::instrument::PROCESS_MESSAGE
                    && e.topic == topic
                    && e.partition == partition
            })
            .filter_map(|e| e.offset)
            .collect()
    }

    pub fn total_messages(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event == streamtail::instrument::PROCESS_MESSAGE)
            .count()
    }
}

impl Instrumenter for RecordingInstrumenter {
    fn instrument(
        &self,
        event: &'static str,
        payload: &EventPayload<'_>,
        f: &mut dyn FnMut() -> Result<()>,
    ) -> Result<()> {
        let offset = match payload {
            EventPayload::Message { offset, .. } => Some(*offset),
            EventPayload::Batch { .. } => None,
        };
        self.events.lock().push(RecordedEvent {
            event,
            topic: payload.topic().to_string(),
            partition: payload.partition(),
            offset,
        });
        f()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Everything a scenario needs: the consumer plus handles into the state of
/// each collaborator.
pub struct Harness {
    pub consumer: Consumer<InMemoryCluster, ScriptedGroup, OffsetStore<InMemoryBackend>>,
    pub cluster: Arc<Mutex<ClusterState>>,
    pub group: Arc<Mutex<GroupState>>,
    pub backend: Arc<Mutex<BackendState>>,
    pub recorder: RecordingInstrumenter,
}

impl Harness {
    /// Committed offset for a partition, as the coordinator sees it.
    pub fn committed(&self, topic: &str, partition: i32) -> Option<i64> {
        self.backend.lock().committed.get(&TopicPartition::new(topic, partition)).copied()
    }
}

/// Build a consumer wired to fresh in-memory collaborators.
///
/// The returned closures-free harness exposes the cluster so scenarios can
/// produce messages and script faults before (or while) the loop runs.
pub fn harness_with(config: ConsumerConfig, setup: impl FnOnce(&InMemoryCluster, &ScriptedGroup)) -> Harness {
    init_tracing();
    let cluster = InMemoryCluster::new();
    let group = ScriptedGroup::new();
    setup(&cluster, &group);

    let cluster_state = cluster.handle();
    let group_state = group.handle();
    let backend = InMemoryBackend::new(cluster.handle());
    let backend_state = backend.handle();
    let offsets = OffsetStore::from_config(backend, &config);
    let recorder = RecordingInstrumenter::default();

    let consumer = Consumer::new(config, Arc::new(cluster), group, offsets)
        .expect("valid test config")
        .with_instrumenter(Arc::new(recorder.clone()));

    Harness {
        consumer,
        cluster: cluster_state,
        group: group_state,
        backend: backend_state,
        recorder,
    }
}
