use thiserror::Error;

use crate::domain::{MessageIdentity, MessageKind};

/// Errors a queue reports to its callers.
///
/// Consumer-side processing failures are never represented here; they show up
/// as lease expiry and end in redelivery or dead-lettering.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid delay {delay}: delay must not be negative")]
    InvalidDelay { delay: chrono::TimeDelta },

    #[error("batch poll of {requested} messages not supported by this queue")]
    UnsupportedBatchSize { requested: usize },

    #[error("queue unavailable: {reason}")]
    QueueUnavailable { reason: String },

    #[error("lease on {identity} is no longer held")]
    LeaseLost { identity: MessageIdentity },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate handler for message kind={0}")]
    DuplicateHandler(MessageKind),
}

/// A message handler failed; the lease is failed and the queue decides
/// between redelivery and dead-lettering.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler registered for message kind={0}")]
    HandlerNotFound(MessageKind),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
