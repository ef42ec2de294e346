//! Per-identity delivery state machine.

use serde::{Deserialize, Serialize};

/// Delivery state of a message identity.
///
/// State transitions:
/// - Pending -> Ready (delay elapses)
/// - Ready -> InFlight (poll delivers, lease starts)
/// - InFlight -> Acked (consumer acks)
/// - InFlight -> Ready (lease expires or consumer fails, attempts < max)
/// - InFlight -> Dead (lease expires or consumer fails, attempts >= max)
/// - Pending/InFlight -> Pending (reschedule)
///
/// Acked and Dead records are dropped from tracking immediately, so a record
/// stored by a queue is only ever Pending or InFlight; Ready is derived from
/// the ready time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageState {
    Pending,
    Ready,
    InFlight,
    Acked,
    Dead,
}

impl MessageState {
    /// States in which `ensure` treats the identity as taken.
    pub fn is_tracked(self) -> bool {
        matches!(
            self,
            MessageState::Pending | MessageState::Ready | MessageState::InFlight
        )
    }
}
