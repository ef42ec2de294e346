//! ReaperLoop - expires overdue leases on a timer.
//!
//! Polling already reclaims expired leases, but only when someone polls. The
//! reaper makes redelivery and dead-lettering progress on an idle queue too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::queue::Queue;

pub struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub fn spawn(queue: Arc<dyn Queue>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                match queue.redeliver_expired().await {
                    Ok(0) => {}
                    Ok(reclaimed) => debug!(reclaimed, "reaped expired leases"),
                    Err(QueueError::QueueUnavailable { reason }) => {
                        info!(%reason, "queue unavailable, reaper stopping");
                        break;
                    }
                    Err(err) => warn!(error = %err, "reaping expired leases failed"),
                }
            }
        });
        Self { shutdown_tx, join }
    }

    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}
