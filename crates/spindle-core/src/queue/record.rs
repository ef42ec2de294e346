//! Delivery record: a message plus its scheduling and lease bookkeeping.

use std::time::{Duration, Instant};

use super::MessageState;
use crate::domain::Message;

/// A push that arrived while the identity was in flight. It is applied once
/// the current lease settles.
#[derive(Debug, Clone)]
pub struct FollowUp {
    pub message: Message,
    pub ready_at: Instant,
}

/// Single source of truth for one message identity inside a queue.
///
/// - `state` is only ever `Pending` or `InFlight`; settled records are removed.
/// - `schedule_seq` matches exactly one live entry in the ready heap while
///   pending; older heap entries are stale and skipped.
/// - `generation` changes whenever a lease starts or is cancelled, so a lease
///   handle is valid only while its generation matches and the record is in
///   flight.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub message: Message,
    pub state: MessageState,
    pub ready_at: Instant,
    pub schedule_seq: u64,
    pub lease_expires_at: Option<Instant>,
    pub generation: u64,

    /// Deliveries so far, including the current one while in flight.
    pub attempts: u32,
    pub max_attempts: u32,

    pub follow_up: Option<FollowUp>,
}

impl DeliveryRecord {
    pub fn new(message: Message, ready_at: Instant, default_max_attempts: u32) -> Self {
        let max_attempts = attempt_budget(&message, default_max_attempts);
        Self {
            message,
            state: MessageState::Pending,
            ready_at,
            schedule_seq: 0,
            lease_expires_at: None,
            generation: 0,
            attempts: 0,
            max_attempts,
            follow_up: None,
        }
    }

    /// Observable state at `now` (Pending becomes Ready once its time is due).
    pub fn state_at(&self, now: Instant) -> MessageState {
        match self.state {
            MessageState::Pending if self.ready_at <= now => MessageState::Ready,
            state => state,
        }
    }

    /// Replace the payload of a pending record (a repeated push).
    pub fn replace_message(&mut self, message: Message, default_max_attempts: u32) {
        self.max_attempts = attempt_budget(&message, default_max_attempts);
        self.message = message;
    }

    /// Ready -> InFlight. Returns the generation identifying the new lease.
    pub fn start_lease(&mut self, now: Instant, ack_timeout: Duration) -> u64 {
        self.state = MessageState::InFlight;
        self.attempts += 1;
        self.generation += 1;
        self.lease_expires_at = Some(now + ack_timeout);
        self.generation
    }

    pub fn holds_lease(&self, generation: u64) -> bool {
        self.state == MessageState::InFlight && self.generation == generation
    }

    /// The lease is held and its deadline has not passed yet, even if no
    /// sweep has reclaimed it.
    pub fn lease_live_at(&self, generation: u64, now: Instant) -> bool {
        self.holds_lease(generation) && self.lease_expires_at.is_some_and(|deadline| now < deadline)
    }

    /// Drop any lease and go back to Pending. Attempts are untouched.
    pub fn release(&mut self) {
        if self.state == MessageState::InFlight {
            self.generation += 1;
        }
        self.state = MessageState::Pending;
        self.lease_expires_at = None;
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Start over from a follow-up push: fresh payload, attempts reset.
    pub fn restart_from(&mut self, follow_up: FollowUp, default_max_attempts: u32) {
        self.release();
        self.replace_message(follow_up.message, default_max_attempts);
        self.attempts = 0;
        self.ready_at = follow_up.ready_at;
    }
}

/// Per-message override or queue default, never below one delivery.
fn attempt_budget(message: &Message, default_max_attempts: u32) -> u32 {
    message.max_attempts().unwrap_or(default_max_attempts).max(1)
}
