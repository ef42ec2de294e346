use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::queue::Queue;
use crate::runtime::Runtime;

/// Worker group handle.
/// - `request_shutdown()` stops every worker from taking new leases
/// - `shutdown_and_join()` also waits for them to finish
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `config.workers` workers polling `queue`.
    pub fn spawn(config: &WorkerConfig, queue: Arc<dyn Queue>, runtime: Arc<Runtime>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let batch_size = if queue.can_poll_many() {
            config.batch_size.max(1)
        } else {
            1
        };

        let mut joins = Vec::with_capacity(config.workers);
        for worker_id in 0..config.workers {
            let q = Arc::clone(&queue);
            let rt = Arc::clone(&runtime);
            let mut rx = shutdown_rx.clone();
            let poll_interval = config.poll_interval;

            let join = tokio::spawn(async move {
                worker_loop(worker_id, q, rt, batch_size, poll_interval, &mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight handler execution is not interrupted; workers just stop
    /// taking new leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            let _ = j.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<dyn Queue>,
    runtime: Arc<Runtime>,
    batch_size: usize,
    poll_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // poll_many returns immediately when nothing is ready.
        let idle = match queue.poll_many(batch_size, runtime.as_ref()).await {
            Ok(0) => true,
            Ok(_) => false,
            Err(QueueError::QueueUnavailable { reason }) => {
                info!(worker_id, %reason, "queue unavailable, worker stopping");
                break;
            }
            Err(err) => {
                warn!(worker_id, error = %err, "poll failed");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // Sender gone: the group was dropped without a shutdown.
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        } else {
            tokio::task::yield_now().await;
        }
    }
    debug!(worker_id, "worker stopped");
}
