//! Group membership boundary
//!
//! The join/sync sub-protocol, partition assignment strategy, and member
//! bookkeeping live behind the [`Group`] trait. The consumer core only
//! needs to join, leave, beacon, and read the current [`Assignment`] and
//! generation token.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The partitions this member is responsible for, keyed by topic.
///
/// Produced by the group on each successful join/sync and replaced
/// atomically on rebalance; an assignment is only meaningful within the
/// generation it was issued for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    partitions: BTreeMap<String, Vec<i32>>,
}

impl Assignment {
    /// An assignment holding no partitions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an assignment from topic → partitions entries.
    pub fn new(partitions: BTreeMap<String, Vec<i32>>) -> Self {
        let mut assignment = Self { partitions };
        for topic_partitions in assignment.partitions.values_mut() {
            topic_partitions.sort_unstable();
            topic_partitions.dedup();
        }
        assignment.partitions.retain(|_, p| !p.is_empty());
        assignment
    }

    /// Whether this member holds no partitions at all.
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Whether the given partition is part of this assignment.
    pub fn contains(&self, topic: &str, partition: i32) -> bool {
        self.partitions
            .get(topic)
            .is_some_and(|partitions| partitions.contains(&partition))
    }

    /// Total number of assigned partitions across all topics.
    pub fn partition_count(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    /// Iterate topics with their assigned partitions, in topic order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[i32])> {
        self.partitions
            .iter()
            .map(|(topic, partitions)| (topic.as_str(), partitions.as_slice()))
    }

    /// Topics with at least one assigned partition.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<(S, i32)> for Assignment {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        let mut partitions: BTreeMap<String, Vec<i32>> = BTreeMap::new();
        for (topic, partition) in iter {
            partitions.entry(topic.into()).or_default().push(partition);
        }
        Self::new(partitions)
    }
}

/// Membership in a named consumer group.
///
/// The generation id is an integer token issued by the coordinator,
/// strictly increasing across successful joins; implementations are the
/// single writer of both the assignment and the generation, the consumer
/// only reads them.
pub trait Group {
    /// Add a topic to the subscription set used at the next join.
    fn subscribe(&mut self, topic: &str);

    /// Join (or rejoin) the group, blocking through the join/sync exchange.
    ///
    /// On success the new generation and assignment are observable through
    /// [`generation_id`](Group::generation_id) and
    /// [`assigned_partitions`](Group::assigned_partitions).
    ///
    /// # Errors
    /// [`Error::Group`](crate::Error::Group) when the coordinator rejects
    /// the join or the sync exchange fails.
    fn join(&mut self) -> Result<()>;

    /// Leave the group gracefully. A no-op when not currently a member.
    ///
    /// # Errors
    /// [`Error::Group`](crate::Error::Group) when the leave request fails.
    fn leave(&mut self) -> Result<()>;

    /// Whether this member currently belongs to the group.
    fn is_member(&self) -> bool;

    /// The generation token of the current membership, if any.
    fn generation_id(&self) -> Option<i32>;

    /// The partitions assigned to this member in the current generation.
    fn assigned_partitions(&self) -> Assignment;

    /// Send one liveness beacon to the coordinator.
    ///
    /// # Errors
    /// [`Error::Heartbeat`](crate::Error::Heartbeat) when the coordinator
    /// rejects the beacon, e.g. because the session expired or a rebalance
    /// is in progress.
    fn heartbeat(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_from_pairs() {
        let assignment: Assignment =
            [("events", 1), ("events", 0), ("audit", 2), ("events", 1)].into_iter().collect();

        assert!(!assignment.is_empty());
        assert_eq!(assignment.partition_count(), 3);
        assert!(assignment.contains("events", 0));
        assert!(assignment.contains("events", 1));
        assert!(assignment.contains("audit", 2));
        assert!(!assignment.contains("events", 2));
        assert!(!assignment.contains("metrics", 0));

        // iteration is ordered and deduplicated
        let collected: Vec<(&str, &[i32])> = assignment.iter().collect();
        assert_eq!(collected, vec![("audit", &[2][..]), ("events", &[0, 1][..])]);
    }

    #[test]
    fn test_empty_assignment() {
        let assignment = Assignment::empty();
        assert!(assignment.is_empty());
        assert_eq!(assignment.partition_count(), 0);
        assert_eq!(assignment.topics().count(), 0);
    }

    #[test]
    fn test_topicless_entries_are_dropped() {
        let mut map = BTreeMap::new();
        map.insert("events".to_string(), vec![0]);
        map.insert("empty".to_string(), Vec::new());
        let assignment = Assignment::new(map);
        assert_eq!(assignment.topics().collect::<Vec<_>>(), vec!["events"]);
    }
}
