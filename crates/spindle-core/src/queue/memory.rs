//! In-memory queue implementation.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::TimeDelta;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
    DeadLetters, DeadMessageHandler, DeliveryRecord, FollowUp, MessageLease, MessageState, Queue,
    QueueCallback,
};
use crate::config::{QueueConfig, QueueMode};
use crate::domain::{Message, MessageAction, MessageIdentity};
use crate::error::QueueError;
use crate::observability::QueueCounts;
use crate::ports::{Clock, SystemClock};

/// Ack timeout reported while disabled.
const DISABLED_ACK_TIMEOUT: Duration = Duration::from_secs(60);

/// Entry of the ready-time heap.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first, then
/// insertion order).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledEntry {
    ready_at: Instant,
    seq: u64,
    identity: MessageIdentity,
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.ready_at, other.seq).cmp(&(self.ready_at, self.seq))
    }
}

/// Entry of the lease-deadline heap, same min-heap trick.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseEntry {
    expires_at: Instant,
    generation: u64,
    identity: MessageIdentity,
}

impl PartialOrd for LeaseEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeaseEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (other.expires_at, other.generation).cmp(&(self.expires_at, self.generation))
    }
}

/// What happened to a lease that did not end in an ack.
enum Settled {
    Redelivered,
    Dead(Message),
}

struct Grant {
    identity: MessageIdentity,
    generation: u64,
    message: Message,
}

/// In-memory queue state. Every transition happens under one lock.
struct InMemoryQueueState {
    /// One record per tracked identity (Pending or InFlight only).
    records: HashMap<MessageIdentity, DeliveryRecord>,

    /// Ready-time heap; entries whose seq no longer matches are stale.
    scheduled: BinaryHeap<ScheduledEntry>,

    /// Lease-deadline heap; entries whose generation no longer matches are stale.
    leases: BinaryHeap<LeaseEntry>,

    next_seq: u64,
    acked: u64,
    dead: u64,
    closed: bool,
}

impl InMemoryQueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            scheduled: BinaryHeap::new(),
            leases: BinaryHeap::new(),
            next_seq: 0,
            acked: 0,
            dead: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed {
            return Err(QueueError::QueueUnavailable {
                reason: "queue is closed".to_string(),
            });
        }
        Ok(())
    }

    /// (Re)arm a record as Pending at `ready_at`.
    fn schedule(&mut self, identity: &MessageIdentity, ready_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if let Some(record) = self.records.get_mut(identity) {
            record.release();
            record.ready_at = ready_at;
            record.schedule_seq = seq;
            self.scheduled.push(ScheduledEntry {
                ready_at,
                seq,
                identity: identity.clone(),
            });
        }
    }

    fn push(&mut self, message: Message, ready_at: Instant, max_attempts: u32) {
        let identity = message.identity();
        match self.records.get_mut(&identity) {
            None => {
                let record = DeliveryRecord::new(message, ready_at, max_attempts);
                self.records.insert(identity.clone(), record);
                self.schedule(&identity, ready_at);
            }
            Some(record) if record.state == MessageState::InFlight => {
                debug!(%identity, "identity in flight, push recorded as follow-up");
                record.follow_up = Some(FollowUp { message, ready_at });
            }
            Some(record) => {
                match (record.message.action(), message.action()) {
                    (
                        MessageAction::CancelExecution { user: previous_user, .. },
                        MessageAction::CancelExecution { user, .. },
                    ) => debug!(%identity, %previous_user, %user, "pending cancel replaced"),
                    _ => debug!(%identity, replaced = %record.message.id(), "pending message replaced"),
                }
                record.replace_message(message, max_attempts);
                self.schedule(&identity, ready_at);
            }
        }
    }

    fn reschedule(&mut self, identity: &MessageIdentity, ready_at: Instant) -> bool {
        if !self.records.contains_key(identity) {
            return false;
        }
        self.schedule(identity, ready_at);
        true
    }

    /// Ready -> InFlight for the earliest due record, if any.
    fn claim(&mut self, now: Instant, ack_timeout: Duration) -> Option<Grant> {
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break; // Heap is sorted, so we can stop
            }
            let entry = self.scheduled.pop()?;
            let Some(record) = self.records.get_mut(&entry.identity) else {
                continue;
            };
            if record.state != MessageState::Pending || record.schedule_seq != entry.seq {
                continue;
            }

            let generation = record.start_lease(now, ack_timeout);
            let message = record.message.delivered(record.attempts);
            self.leases.push(LeaseEntry {
                expires_at: now + ack_timeout,
                generation,
                identity: entry.identity.clone(),
            });
            return Some(Grant {
                identity: entry.identity,
                generation,
                message,
            });
        }
        None
    }

    /// Settle a lease that ended without an ack.
    fn settle_failure(
        &mut self,
        identity: &MessageIdentity,
        ready_at: Instant,
        reason: String,
        max_attempts: u32,
    ) -> Option<Settled> {
        let record = self.records.get_mut(identity)?;

        if record.is_exhausted() {
            let record = self.records.remove(identity)?;
            self.dead += 1;
            warn!(%identity, attempts = record.attempts, last_error = %reason, "attempts exhausted");
            let dead = record.message.delivered(record.attempts);
            if let Some(follow_up) = record.follow_up {
                let ready_at = follow_up.ready_at;
                self.push(follow_up.message, ready_at, max_attempts);
            }
            return Some(Settled::Dead(dead));
        }

        let ready_at = match record.follow_up.take() {
            Some(follow_up) => {
                let merged = ready_at.min(follow_up.ready_at);
                record.replace_message(follow_up.message, max_attempts);
                merged
            }
            None => ready_at,
        };
        self.schedule(identity, ready_at);
        Some(Settled::Redelivered)
    }

    /// Reclaim every lease whose deadline is at or before `now`.
    fn expire_leases(&mut self, now: Instant, max_attempts: u32) -> (usize, Vec<Message>) {
        let mut reclaimed = 0;
        let mut dead = Vec::new();
        while let Some(entry) = self.leases.peek() {
            if entry.expires_at > now {
                break;
            }
            let Some(entry) = self.leases.pop() else {
                break;
            };
            let live = self
                .records
                .get(&entry.identity)
                .is_some_and(|record| record.holds_lease(entry.generation));
            if !live {
                continue;
            }

            reclaimed += 1;
            match self.settle_failure(&entry.identity, now, "ack timeout".to_string(), max_attempts) {
                Some(Settled::Dead(message)) => dead.push(message),
                Some(Settled::Redelivered) => {
                    warn!(identity = %entry.identity, "lease expired without ack, message ready for redelivery");
                }
                None => {}
            }
        }
        (reclaimed, dead)
    }

    fn ack(&mut self, identity: &MessageIdentity, generation: u64, max_attempts: u32) -> Result<(), QueueError> {
        let Some(record) = self.records.get_mut(identity) else {
            return Err(QueueError::LeaseLost { identity: identity.clone() });
        };
        if !record.holds_lease(generation) {
            return Err(QueueError::LeaseLost { identity: identity.clone() });
        }

        self.acked += 1;
        match record.follow_up.take() {
            Some(follow_up) => {
                let ready_at = follow_up.ready_at;
                record.restart_from(follow_up, max_attempts);
                self.schedule(identity, ready_at);
            }
            None => {
                self.records.remove(identity);
            }
        }
        Ok(())
    }

    fn counts(&self, now: Instant) -> QueueCounts {
        let mut counts = QueueCounts {
            acked: self.acked,
            dead: self.dead,
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state_at(now) {
                MessageState::Pending => counts.pending += 1,
                MessageState::Ready => counts.ready += 1,
                MessageState::InFlight => counts.in_flight += 1,
                MessageState::Acked | MessageState::Dead => {}
            }
        }
        counts
    }
}

struct Inner {
    state: Mutex<InMemoryQueueState>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    dead_letters: DeadLetters,
}

impl Inner {
    fn is_disabled(&self) -> bool {
        self.config.mode == QueueMode::Disabled
    }

    fn ready_at(&self, delay: TimeDelta) -> Result<Instant, QueueError> {
        let delay_std = delay.to_std().map_err(|_| QueueError::InvalidDelay { delay })?;
        self.clock
            .now()
            .checked_add(delay_std)
            .ok_or(QueueError::InvalidDelay { delay })
    }
}

/// In-memory queue implementation.
///
/// All state lives behind a single `tokio::sync::Mutex`; callbacks and
/// dead-letter handlers always run after the lock is released, so they may
/// call back into the queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    pub fn new(config: QueueConfig, handlers: Vec<Arc<dyn DeadMessageHandler>>) -> Self {
        Self::with_clock(config, handlers, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: QueueConfig,
        handlers: Vec<Arc<dyn DeadMessageHandler>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let dead_letters = match config.mode {
            QueueMode::Active => DeadLetters::new(handlers),
            QueueMode::Disabled => {
                warn!(
                    "InMemoryQueue was created in disabled mode - all queue operations will be discarded. \
                     This is OK if the queue was intended to be disabled"
                );
                DeadLetters::default()
            }
        };
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(InMemoryQueueState::new()),
                config,
                clock,
                dead_letters,
            }),
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.inner.config.mode
    }

    /// Stop serving: every later call fails with `QueueUnavailable`.
    pub async fn close(&self) {
        if self.inner.is_disabled() {
            return;
        }
        self.inner.state.lock().await.closed = true;
        info!("queue closed");
    }

    pub async fn counts(&self) -> QueueCounts {
        let state = self.inner.state.lock().await;
        state.counts(self.inner.clock.now())
    }

    /// Current state of the identity, if tracked.
    pub async fn state_of(&self, identity: &MessageIdentity) -> Option<MessageState> {
        let state = self.inner.state.lock().await;
        state
            .records
            .get(identity)
            .map(|record| record.state_at(self.inner.clock.now()))
    }

    fn max_attempts(&self) -> u32 {
        self.inner.config.max_attempts
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    fn ack_timeout(&self) -> Duration {
        if self.inner.is_disabled() {
            return DISABLED_ACK_TIMEOUT;
        }
        self.inner.config.ack_timeout
    }

    fn can_poll_many(&self) -> bool {
        !self.inner.is_disabled() && self.inner.config.can_poll_many
    }

    fn dead_message_handlers(&self) -> &[Arc<dyn DeadMessageHandler>] {
        self.inner.dead_letters.handlers()
    }

    async fn push(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError> {
        if self.inner.is_disabled() {
            return Ok(());
        }
        let ready_at = self.inner.ready_at(delay)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        debug!(message_id = %message.id(), identity = %message.identity(), %delay, "push");
        state.push(message, ready_at, self.max_attempts());
        Ok(())
    }

    async fn ensure(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError> {
        if self.inner.is_disabled() {
            return Ok(());
        }
        let ready_at = self.inner.ready_at(delay)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        let identity = message.identity();
        let now = self.inner.clock.now();
        let taken = state
            .records
            .get(&identity)
            .is_some_and(|record| record.state_at(now).is_tracked());
        if taken {
            debug!(%identity, "ensure: equivalent message already queued");
            return Ok(());
        }
        debug!(message_id = %message.id(), %identity, %delay, "ensure: pushing");
        state.push(message, ready_at, self.max_attempts());
        Ok(())
    }

    async fn poll_many(
        &self,
        max_messages: usize,
        callback: &dyn QueueCallback,
    ) -> Result<usize, QueueError> {
        if self.inner.is_disabled() {
            return Ok(0);
        }
        if max_messages > 1 && !self.can_poll_many() {
            return Err(QueueError::UnsupportedBatchSize {
                requested: max_messages,
            });
        }

        let (grants, dead) = {
            let mut state = self.inner.state.lock().await;
            state.ensure_open()?;
            let now = self.inner.clock.now();
            let (_, dead) = state.expire_leases(now, self.max_attempts());

            let mut grants = Vec::new();
            while grants.len() < max_messages {
                match state.claim(now, self.inner.config.ack_timeout) {
                    Some(grant) => grants.push(grant),
                    None => break,
                }
            }
            (grants, dead)
        }; // Lock released here

        self.inner.dead_letters.dispatch_all(&dead).await;

        let mut delivered = 0;
        for grant in grants {
            // Earlier callbacks in the batch may have outlived this lease, and
            // another consumer may already hold the message again.
            let live = {
                let state = self.inner.state.lock().await;
                let now = self.inner.clock.now();
                state
                    .records
                    .get(&grant.identity)
                    .is_some_and(|record| record.lease_live_at(grant.generation, now))
            };
            if !live {
                debug!(identity = %grant.identity, "lease lapsed before delivery, skipping");
                continue;
            }

            delivered += 1;
            debug!(
                identity = %grant.identity,
                attempt = grant.message.attempts(),
                "delivering message"
            );
            let lease = InMemoryLease {
                inner: Arc::clone(&self.inner),
                identity: grant.identity,
                generation: grant.generation,
                message: grant.message,
            };
            callback.on_message(Box::new(lease)).await;
        }
        Ok(delivered)
    }

    async fn reschedule(&self, message: Message, delay: TimeDelta) -> Result<(), QueueError> {
        if self.inner.is_disabled() {
            return Ok(());
        }
        let ready_at = self.inner.ready_at(delay)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_open()?;
        let identity = message.identity();
        if state.reschedule(&identity, ready_at) {
            debug!(%identity, %delay, "rescheduled");
        } else {
            debug!(%identity, "reschedule ignored: message not queued");
        }
        Ok(())
    }

    async fn redeliver_expired(&self) -> Result<usize, QueueError> {
        if self.inner.is_disabled() {
            return Ok(0);
        }
        let (reclaimed, dead) = {
            let mut state = self.inner.state.lock().await;
            state.ensure_open()?;
            state.expire_leases(self.inner.clock.now(), self.max_attempts())
        };
        self.inner.dead_letters.dispatch_all(&dead).await;
        Ok(reclaimed)
    }
}

/// Lease implementation for InMemoryQueue.
struct InMemoryLease {
    inner: Arc<Inner>,
    identity: MessageIdentity,
    generation: u64,
    message: Message,
}

#[async_trait]
impl MessageLease for InMemoryLease {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), QueueError> {
        let mut state = self.inner.state.lock().await;
        state.ack(&self.identity, self.generation, self.inner.config.max_attempts)?;
        debug!(identity = %self.identity, attempt = self.message.attempts(), "acked");
        Ok(())
    }

    async fn fail(self: Box<Self>, reason: String) -> Result<(), QueueError> {
        let settled = {
            let mut state = self.inner.state.lock().await;
            let holds = state
                .records
                .get(&self.identity)
                .is_some_and(|record| record.holds_lease(self.generation));
            if !holds {
                return Err(QueueError::LeaseLost {
                    identity: self.identity.clone(),
                });
            }

            let delay = self.inner.config.retry.next_delay(self.message.attempts());
            let now = self.inner.clock.now();
            let ready_at = now.checked_add(delay).unwrap_or(now);
            warn!(
                identity = %self.identity,
                attempt = self.message.attempts(),
                error = %reason,
                "consumer failed message"
            );
            state.settle_failure(&self.identity, ready_at, reason, self.inner.config.max_attempts)
        }; // Lock released here

        if let Some(Settled::Dead(message)) = settled {
            self.inner.dead_letters.dispatch(&message).await;
        }
        Ok(())
    }
}
