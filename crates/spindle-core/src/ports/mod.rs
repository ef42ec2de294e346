//! Ports: seams to the outside world the queue depends on.

pub mod clock;

pub use self::clock::{Clock, ManualClock, SystemClock};
