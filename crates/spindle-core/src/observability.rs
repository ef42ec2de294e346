//! Queue counters and logging setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Snapshot of a queue by delivery state. `acked` and `dead` are cumulative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub ready: usize,
    pub in_flight: usize,
    pub acked: u64,
    pub dead: u64,
}

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
