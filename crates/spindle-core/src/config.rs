//! Configuration for the queue and its consumer loops.
//!
//! Everything is plain serde data with defaults, loaded from JSON:
//!
//! ```json
//! {
//!   "queue": { "mode": "active", "ack_timeout_ms": 60000, "max_attempts": 5 },
//!   "worker": { "workers": 4, "poll_interval_ms": 100 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::RetryPolicy;

/// Whether the queue does any work at all.
///
/// `Disabled` turns every queue and runner operation into a successful no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    #[default]
    Active,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub mode: QueueMode,

    /// How long a delivered message may stay unacknowledged before it is
    /// presumed lost.
    #[serde(rename = "ack_timeout_ms", with = "duration_ms")]
    pub ack_timeout: Duration,

    /// Deliveries allowed before a message is dead-lettered. Messages may
    /// override this individually.
    pub max_attempts: u32,

    /// Whether `poll_many` may hand out more than one message per call.
    pub can_poll_many: bool,

    /// Backoff after an explicit `fail`.
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            mode: QueueMode::Active,
            ack_timeout: Duration::from_secs(60),
            max_attempts: 5,
            can_poll_many: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl QueueConfig {
    pub fn disabled() -> Self {
        Self {
            mode: QueueMode::Disabled,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("queue.max_attempts must be at least 1".into()));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Invalid("queue.ack_timeout_ms must be positive".into()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid("queue.retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Invalid("queue.retry.jitter must be within 0.0..=1.0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent consumer tasks.
    pub workers: usize,

    /// Largest batch a worker asks for per poll (clamped to 1 when the queue
    /// cannot poll many).
    pub batch_size: usize,

    /// Idle wait between polls that found nothing.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Period of the lease reaper.
    #[serde(rename = "reaper_interval_ms", with = "duration_ms")]
    pub reaper_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 1,
            poll_interval: Duration::from_millis(100),
            reaper_interval: Duration::from_secs(1),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("worker.workers must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("worker.batch_size must be at least 1".into()));
        }
        if self.poll_interval.is_zero() || self.reaper_interval.is_zero() {
            return Err(ConfigError::Invalid("worker intervals must be positive".into()));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
}

impl SpindleConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SpindleConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.worker.validate()
    }
}

/// `Duration` as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
