//! Consumer configuration
//!
//! Configuration follows the same conventions as the rest of the crate's
//! settings surface: a plain struct with serde support, a builder for
//! programmatic construction, explicit `validate()`, and all defaults
//! declared as constants below.

use crate::error::{Error, Result};
use crate::offset::StartOffset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default coordinator-side liveness budget
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Fraction of the session timeout used as the heartbeat interval when none
/// is given explicitly
pub const DEFAULT_HEARTBEAT_DIVISOR: u32 = 3;

/// Default interval between automatic offset commits
pub const DEFAULT_OFFSET_COMMIT_INTERVAL: Duration = Duration::from_secs(10);

/// Default processed-message count that forces an offset commit
/// (0 disables the count-based trigger)
pub const DEFAULT_OFFSET_COMMIT_THRESHOLD: usize = 0;

/// Default cap on bytes fetched from a single partition per request (1 MiB)
pub const DEFAULT_MAX_BYTES_PER_PARTITION: usize = 1024 * 1024;

/// Default minimum bytes the broker should accumulate before answering
pub const DEFAULT_MIN_BYTES: usize = 1;

/// Default maximum time the broker may block waiting for `min_bytes`
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(5);

/// Durations cross the serde boundary as integer milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Configuration for a [`Consumer`](crate::consumer::Consumer)
///
/// # Example
///
/// ```rust,ignore
/// use streamtail::config::ConsumerConfig;
/// use std::time::Duration;
///
/// let config = ConsumerConfig::builder("invoice-workers")
///     .session_timeout(Duration::from_secs(20))
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Consumer group this member coordinates with (required, non-empty)
    pub group_id: String,

    /// How long the coordinator waits for a heartbeat before declaring this
    /// member dead (milliseconds on the wire)
    #[serde(with = "duration_ms")]
    pub session_timeout: Duration,

    /// Interval between liveness beacons; must be strictly smaller than the
    /// session timeout
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,

    /// How often buffered processed offsets are committed
    #[serde(with = "duration_ms")]
    pub offset_commit_interval: Duration,

    /// Processed-message count that forces a commit regardless of the
    /// interval; 0 disables the trigger
    pub offset_commit_threshold: usize,
}

impl ConsumerConfig {
    /// Create a config with defaults for the given group.
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            heartbeat_interval: DEFAULT_SESSION_TIMEOUT / DEFAULT_HEARTBEAT_DIVISOR,
            offset_commit_interval: DEFAULT_OFFSET_COMMIT_INTERVAL,
            offset_commit_threshold: DEFAULT_OFFSET_COMMIT_THRESHOLD,
        }
    }

    /// Create a builder for this config.
    pub fn builder(group_id: impl Into<String>) -> ConsumerConfigBuilder {
        ConsumerConfigBuilder { config: Self::new(group_id) }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the group id is empty, a timeout is
    /// zero, or the heartbeat interval does not fit inside the session
    /// timeout.
    pub fn validate(&self) -> Result<()> {
        if self.group_id.trim().is_empty() {
            return Err(Error::Config("group_id must not be empty".to_string()));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::Config("session_timeout must be non-zero".to_string()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Config("heartbeat_interval must be non-zero".to_string()));
        }
        if self.heartbeat_interval >= self.session_timeout {
            return Err(Error::Config(format!(
                "heartbeat_interval ({:?}) must be smaller than session_timeout ({:?})",
                self.heartbeat_interval, self.session_timeout
            )));
        }
        Ok(())
    }
}

/// Builder for [`ConsumerConfig`]
#[derive(Debug, Clone)]
pub struct ConsumerConfigBuilder {
    config: ConsumerConfig,
}

impl ConsumerConfigBuilder {
    /// Set the session timeout (default: 30 s).
    ///
    /// Unless a heartbeat interval was set explicitly, it is re-derived as a
    /// third of the new session timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        let derived =
            self.config.heartbeat_interval == self.config.session_timeout / DEFAULT_HEARTBEAT_DIVISOR;
        self.config.session_timeout = timeout;
        if derived {
            self.config.heartbeat_interval = timeout / DEFAULT_HEARTBEAT_DIVISOR;
        }
        self
    }

    /// Set the heartbeat interval (default: a third of the session timeout).
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Set the automatic offset commit interval (default: 10 s).
    pub fn offset_commit_interval(mut self, interval: Duration) -> Self {
        self.config.offset_commit_interval = interval;
        self
    }

    /// Set the processed-count commit trigger (default: disabled).
    pub fn offset_commit_threshold(mut self, threshold: usize) -> Self {
        self.config.offset_commit_threshold = threshold;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when validation fails.
    pub fn build(self) -> Result<ConsumerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Per-topic subscription options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Where to begin when no committed offset exists for a newly assigned
    /// partition
    pub start_offset: StartOffset,
    /// Cap on bytes a single fetch may pull from one partition of this topic
    pub max_bytes_per_partition: usize,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            start_offset: StartOffset::Earliest,
            max_bytes_per_partition: DEFAULT_MAX_BYTES_PER_PARTITION,
        }
    }
}

impl SubscriptionOptions {
    /// Options seeded from the log start.
    pub fn earliest() -> Self {
        Self::default()
    }

    /// Options that only consume writes arriving after subscription.
    pub fn latest() -> Self {
        Self { start_offset: StartOffset::Latest, ..Self::default() }
    }

    /// Override the per-partition fetch cap.
    pub fn max_bytes_per_partition(mut self, max_bytes: usize) -> Self {
        self.max_bytes_per_partition = max_bytes;
        self
    }
}

/// Per-call fetch tuning for `each_message` / `each_batch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Minimum bytes the broker should accumulate across the request before
    /// answering
    pub min_bytes: usize,
    /// Longest the broker may block waiting for `min_bytes`; empty responses
    /// after the wait are normal
    #[serde(with = "duration_ms")]
    pub max_wait: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self { min_bytes: DEFAULT_MIN_BYTES, max_wait: DEFAULT_MAX_WAIT }
    }
}

impl FetchSettings {
    /// Fetch settings with explicit values.
    pub fn new(min_bytes: usize, max_wait: Duration) -> Self {
        Self { min_bytes, max_wait }
    }
}
