//! Error types for streamtail
//!
//! The consume loop distinguishes errors it can absorb from errors that must
//! surface to the caller. Every fallible operation in the crate returns the
//! same [`Error`] enum; [`Error::recovery`] maps each variant onto the action
//! the loop takes before resuming (or giving up).
//!
//! | Variant | Recovery |
//! |---------|----------|
//! | `Heartbeat`, `OffsetCommit` | rejoin the group, resume |
//! | `Fetch`, `Connection` | mark cluster metadata stale, resume |
//! | `LeaderNotAvailable` | mark stale, wait 1 s, resume |
//! | everything else | run the shutdown tail, surface |

use thiserror::Error;

/// Result type alias for streamtail operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type a user-supplied message or batch handler may surface.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Action the consume loop takes in response to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Rejoin the consumer group, then resume consuming.
    Rejoin,
    /// Mark cluster metadata as stale and resume; the next fetch refreshes.
    RefreshMetadata,
    /// Mark metadata stale and wait for a new leader to be elected.
    AwaitLeader,
    /// Not recoverable inside the loop; the shutdown tail runs and the
    /// error surfaces to the caller.
    Fatal,
}

/// Errors raised by the consumer core and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// The coordinator rejected a liveness beacon, usually because the
    /// session already expired.
    #[error("heartbeat rejected by coordinator: {0}")]
    Heartbeat(String),

    /// An offset commit was rejected, typically due to a stale generation.
    #[error("offset commit rejected: {0}")]
    OffsetCommit(String),

    /// A fetch failed at the broker or transport layer.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The partition currently has no elected leader.
    #[error("no leader available for {topic}/{partition}")]
    LeaderNotAvailable {
        /// Topic of the leaderless partition
        topic: String,
        /// Partition index
        partition: i32,
    },

    /// Raw transport failure. FetchOperation wraps this into [`Error::Fetch`]
    /// before it reaches the consume loop.
    #[error("connection error: {0}")]
    Connection(String),

    /// The group reported membership but handed this member an empty
    /// assignment. Either the join protocol misbehaved or the subscription
    /// matches no partitions; both are fail-fast conditions.
    #[error("group returned an empty assignment for this member")]
    NoPartitionsAssigned,

    /// A user handler signalled failure. The offset of the failing message
    /// is not marked as processed.
    #[error("handler failed for {topic}/{partition} at offset {offset}: {source}")]
    Processing {
        /// Topic of the message being handled
        topic: String,
        /// Partition index
        partition: i32,
        /// Offset of the message whose handler failed
        offset: i64,
        /// The handler's error
        #[source]
        source: HandlerError,
    },

    /// Group membership operation (join, sync, leave) failed.
    #[error("consumer group error: {0}")]
    Group(String),

    /// Invalid consumer configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The recovery action the consume loop applies for this error.
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::Heartbeat(_) | Error::OffsetCommit(_) => Recovery::Rejoin,
            Error::Fetch(_) | Error::Connection(_) => Recovery::RefreshMetadata,
            Error::LeaderNotAvailable { .. } => Recovery::AwaitLeader,
            Error::NoPartitionsAssigned
            | Error::Processing { .. }
            | Error::Group(_)
            | Error::Config(_) => Recovery::Fatal,
        }
    }

    /// Whether the consume loop absorbs this error and keeps running.
    pub fn is_recoverable(&self) -> bool {
        self.recovery() != Recovery::Fatal
    }
}
