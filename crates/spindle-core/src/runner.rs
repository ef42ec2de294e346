//! Execution runner: turns execution-control intents into queue messages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use tracing::info;

use crate::domain::{Execution, Message, StageId};
use crate::error::QueueError;
use crate::queue::Queue;

/// Execution-control surface.
///
/// Every call only reports that the signal was accepted by the queue; the
/// effect happens later when a consumer processes the message.
#[async_trait]
pub trait ExecutionRunner: Send + Sync {
    async fn start(&self, execution: &Execution) -> Result<(), QueueError>;

    /// Wake an idle execution up for re-evaluation without touching its state.
    async fn reschedule(&self, execution: &Execution) -> Result<(), QueueError>;

    async fn restart(&self, execution: &Execution, stage_id: &StageId) -> Result<(), QueueError>;

    async fn unpause(&self, execution: &Execution) -> Result<(), QueueError>;

    async fn cancel(
        &self,
        execution: &Execution,
        user: &str,
        reason: Option<&str>,
    ) -> Result<(), QueueError>;
}

/// [`ExecutionRunner`] backed by a [`Queue`].
///
/// When the queue is disabled every call succeeds without effect.
#[derive(Clone)]
pub struct QueueExecutionRunner {
    queue: Arc<dyn Queue>,
}

impl QueueExecutionRunner {
    pub fn new(queue: Arc<dyn Queue>) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &Arc<dyn Queue> {
        &self.queue
    }
}

#[async_trait]
impl ExecutionRunner for QueueExecutionRunner {
    async fn start(&self, execution: &Execution) -> Result<(), QueueError> {
        info!(%execution, application = %execution.application, "starting execution");
        self.queue
            .push(Message::start(execution.clone()), TimeDelta::zero())
            .await
    }

    async fn reschedule(&self, execution: &Execution) -> Result<(), QueueError> {
        info!(%execution, "rescheduling execution");
        self.queue
            .ensure(Message::reschedule(execution.clone()), TimeDelta::zero())
            .await
    }

    async fn restart(&self, execution: &Execution, stage_id: &StageId) -> Result<(), QueueError> {
        info!(%execution, stage = %stage_id, "restarting stage");
        self.queue
            .push(
                Message::restart(execution.clone(), stage_id.clone()),
                TimeDelta::zero(),
            )
            .await
    }

    async fn unpause(&self, execution: &Execution) -> Result<(), QueueError> {
        info!(%execution, "resuming execution");
        self.queue
            .push(Message::resume(execution.clone()), TimeDelta::zero())
            .await
    }

    async fn cancel(
        &self,
        execution: &Execution,
        user: &str,
        reason: Option<&str>,
    ) -> Result<(), QueueError> {
        info!(%execution, user, reason = reason.unwrap_or(""), "cancelling execution");
        let message = Message::cancel(execution.clone(), user, reason.map(str::to_string));
        self.queue.push(message, TimeDelta::zero()).await
    }
}
