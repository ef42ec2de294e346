//! Queue module: the delivery contract and its in-memory engine.

mod dead_letter;
mod memory;
mod record;
mod retry;
mod state;

pub use dead_letter::{CollectDeadMessages, DeadLetters, DeadMessageHandler, LogDeadMessages};
pub use memory::InMemoryQueue;
pub use record::{DeliveryRecord, FollowUp};
pub use retry::RetryPolicy;
pub use state::MessageState;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;

use crate::domain::Message;
use crate::error::QueueError;

/// A delivered message whose lease the consumer now holds.
///
/// The consumer settles it with `ack` or `fail`. Dropping it without either
/// leaves the lease to expire after the queue's ack timeout.
#[async_trait]
pub trait MessageLease: Send {
    /// The delivered copy; `attempts()` is the delivery number, starting at 1.
    fn message(&self) -> &Message;

    /// Processing succeeded; the message leaves the queue.
    async fn ack(self: Box<Self>) -> Result<(), QueueError>;

    /// Processing failed; the queue redelivers or dead-letters.
    async fn fail(self: Box<Self>, reason: String) -> Result<(), QueueError>;
}

/// Receives leases from `poll`. Invoked exactly once per delivered message.
#[async_trait]
pub trait QueueCallback: Send + Sync {
    async fn on_message(&self, lease: Box<dyn MessageLease>);
}

/// Delay-aware, at-least-once work queue.
///
/// Delays are signed so a negative value can be reported as
/// [`QueueError::InvalidDelay`] instead of being silently clamped.
#[async_trait]
pub trait Queue: Send + Sync {
    /// How long a delivered message may stay unacknowledged.
    fn ack_timeout(&self) -> Duration;

    fn can_poll_many(&self) -> bool;

    fn dead_message_handlers(&self) -> &[Arc<dyn DeadMessageHandler>];

    /// Schedule `message` to become ready after `delay`.
    async fn push(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError>;

    /// `push`, unless an equivalent message is already pending or in flight.
    async fn ensure(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError>;

    /// Deliver at most one ready message to `callback`. Returns how many
    /// messages were delivered (0 or 1); never waits for one to appear.
    async fn poll(&self, callback: &dyn QueueCallback) -> Result<usize, QueueError> {
        self.poll_many(1, callback).await
    }

    /// Deliver up to `max_messages` ready messages. Fails with
    /// [`QueueError::UnsupportedBatchSize`] when asked for more than one from
    /// a queue that cannot poll many.
    async fn poll_many(
        &self,
        max_messages: usize,
        callback: &dyn QueueCallback,
    ) -> Result<usize, QueueError>;

    /// Move a pending or in-flight message to a new ready time, cancelling
    /// any lease. Attempts are kept. Unknown messages are ignored.
    async fn reschedule(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError>;

    /// Expire overdue leases now. Returns how many were reclaimed.
    async fn redeliver_expired(&self) -> Result<usize, QueueError>;
}
