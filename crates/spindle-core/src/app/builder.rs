//! AppBuilder - explicit construction and wiring.
//!
//! The queue is built once and handed to the runner, the workers and the
//! reaper; nothing looks it up globally.

use std::sync::Arc;

use tracing::{info, warn};

use super::{ReaperLoop, WorkerGroup};
use crate::config::{QueueMode, SpindleConfig};
use crate::domain::MessageKind;
use crate::error::RegistryError;
use crate::observability::QueueCounts;
use crate::ports::{Clock, SystemClock};
use crate::queue::{DeadMessageHandler, InMemoryQueue, Queue};
use crate::runner::QueueExecutionRunner;
use crate::runtime::{HandlerRegistry, MessageHandler, Runtime};

/// # Example
/// ```ignore
/// let app = AppBuilder::new(config)
///     .handler(MessageKind::StartExecution, Arc::new(StartHandler))?
///     .dead_message_handler(Arc::new(LogDeadMessages))
///     .expect_kinds(&MessageKind::ALL)
///     .build()?;
/// ```
///
/// # Fail-fast
/// `build()` checks that every kind passed to `expect_kinds()` has a
/// handler, so a missing handler is found at startup instead of as a pile of
/// dead letters.
pub struct AppBuilder {
    config: SpindleConfig,
    registry: HandlerRegistry,
    dead_message_handlers: Vec<Arc<dyn DeadMessageHandler>>,
    expected_kinds: Option<Vec<MessageKind>>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing handlers for message kinds: {0:?}")]
    MissingHandlers(Vec<MessageKind>),

    #[error(transparent)]
    Config(#[from] crate::error::ConfigError),
}

impl AppBuilder {
    pub fn new(config: SpindleConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            dead_message_handlers: Vec::new(),
            expected_kinds: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn handler(
        mut self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(kind, handler)?;
        Ok(self)
    }

    /// Dead-letter handlers run in the order they are added.
    pub fn dead_message_handler(mut self, handler: Arc<dyn DeadMessageHandler>) -> Self {
        self.dead_message_handlers.push(handler);
        self
    }

    pub fn expect_kinds(mut self, kinds: &[MessageKind]) -> Self {
        self.expected_kinds = Some(kinds.to_vec());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_kinds {
            let missing: Vec<MessageKind> = expected
                .iter()
                .copied()
                .filter(|kind| self.registry.get(*kind).is_none())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        } else {
            let unhandled = self.registry.missing_kinds();
            if !unhandled.is_empty() {
                warn!(?unhandled, "no handler registered, these messages will be dead-lettered");
            }
        }

        let queue = Arc::new(InMemoryQueue::with_clock(
            self.config.queue.clone(),
            self.dead_message_handlers,
            self.clock,
        ));
        let runner = QueueExecutionRunner::new(queue.clone());
        Ok(App {
            config: self.config,
            queue,
            runner,
            runtime: Arc::new(Runtime::new(Arc::new(self.registry))),
        })
    }
}

/// A wired application, not yet consuming.
pub struct App {
    config: SpindleConfig,
    queue: Arc<InMemoryQueue>,
    runner: QueueExecutionRunner,
    runtime: Arc<Runtime>,
}

impl App {
    pub fn queue(&self) -> &Arc<InMemoryQueue> {
        &self.queue
    }

    pub fn runner(&self) -> &QueueExecutionRunner {
        &self.runner
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub async fn counts(&self) -> QueueCounts {
        self.queue.counts().await
    }

    /// Spawn the workers and the reaper. A disabled queue never delivers, so
    /// nothing is spawned for it.
    pub fn start(&self) -> RunningApp {
        if self.config.queue.mode == QueueMode::Disabled {
            return RunningApp {
                queue: self.queue.clone(),
                workers: None,
                reaper: None,
            };
        }

        let queue: Arc<dyn Queue> = self.queue.clone();
        let workers = WorkerGroup::spawn(&self.config.worker, queue.clone(), self.runtime.clone());
        let reaper = ReaperLoop::spawn(queue, self.config.worker.reaper_interval);
        info!(
            workers = workers.len(),
            ack_timeout_ms = self.config.queue.ack_timeout.as_millis() as u64,
            max_attempts = self.config.queue.max_attempts,
            "consumers started"
        );
        RunningApp {
            queue: self.queue.clone(),
            workers: Some(workers),
            reaper: Some(reaper),
        }
    }
}

/// Handle on the running consumer loops.
pub struct RunningApp {
    queue: Arc<InMemoryQueue>,
    workers: Option<WorkerGroup>,
    reaper: Option<ReaperLoop>,
}

impl RunningApp {
    /// Stop consuming, wait for the loops, then close the queue.
    pub async fn shutdown(self) {
        if let Some(workers) = self.workers {
            workers.shutdown_and_join().await;
        }
        if let Some(reaper) = self.reaper {
            reaper.shutdown_and_join().await;
        }
        self.queue.close().await;
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use std::time::Duration;

    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::{Execution, Message};
    use crate::error::{HandlerError, QueueError};
    use crate::queue::{CollectDeadMessages, RetryPolicy};
    use crate::runner::ExecutionRunner;

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    #[test]
    fn build_succeeds_when_expected_kinds_are_covered() {
        let app = AppBuilder::new(SpindleConfig::default())
            .handler(MessageKind::StartExecution, Arc::new(Noop))
            .unwrap()
            .expect_kinds(&[MessageKind::StartExecution])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_reports_missing_handlers() {
        let app = AppBuilder::new(SpindleConfig::default())
            .handler(MessageKind::StartExecution, Arc::new(Noop))
            .unwrap()
            .expect_kinds(&[MessageKind::StartExecution, MessageKind::CancelExecution])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingHandlers(missing)) if missing == vec![MessageKind::CancelExecution]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = SpindleConfig::default();
        config.queue.max_attempts = 0;
        assert!(matches!(
            AppBuilder::new(config).build(),
            Err(BuildError::Config(_))
        ));
    }

    struct AlwaysFails;

    #[async_trait]
    impl MessageHandler for AlwaysFails {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            Err(HandlerError::failed("nope"))
        }
    }

    fn fast_config() -> SpindleConfig {
        let mut config = SpindleConfig::default();
        config.queue.max_attempts = 2;
        config.queue.retry = RetryPolicy::immediate();
        config.worker.workers = 2;
        config.worker.poll_interval = Duration::from_millis(5);
        config.worker.reaper_interval = Duration::from_millis(20);
        config
    }

    async fn wait_until_drained(app: &App) -> QueueCounts {
        for _ in 0..200 {
            let counts = app.counts().await;
            if counts.pending + counts.ready + counts.in_flight == 0 {
                return counts;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue did not drain: {:?}", app.counts().await);
    }

    #[tokio::test]
    async fn running_app_delivers_and_dead_letters() {
        let dead = Arc::new(CollectDeadMessages::new());
        let app = AppBuilder::new(fast_config())
            .handler(MessageKind::StartExecution, Arc::new(Noop))
            .unwrap()
            .handler(MessageKind::CancelExecution, Arc::new(AlwaysFails))
            .unwrap()
            .dead_message_handler(dead.clone())
            .build()
            .unwrap();
        let running = app.start();

        let execution = Execution::pipeline("checkout");
        app.runner().start(&execution).await.unwrap();
        app.runner().cancel(&execution, "alice", None).await.unwrap();

        let counts = wait_until_drained(&app).await;
        assert_eq!(counts.acked, 1);
        assert_eq!(counts.dead, 1);
        let dead = dead.messages();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].kind(), MessageKind::CancelExecution);
        assert_eq!(dead[0].attempts(), 2);

        running.shutdown().await;
        let err = app.runner().start(&execution).await.unwrap_err();
        assert!(matches!(err, QueueError::QueueUnavailable { .. }));
    }

    #[tokio::test]
    async fn disabled_app_accepts_signals_and_spawns_nothing() {
        let config = SpindleConfig {
            queue: QueueConfig::disabled(),
            ..SpindleConfig::default()
        };
        let app = AppBuilder::new(config).build().unwrap();
        let running = app.start();
        assert!(running.workers.is_none());

        app.runner().start(&Execution::pipeline("checkout")).await.unwrap();
        assert_eq!(app.counts().await, QueueCounts::default());
        running.shutdown().await;
    }

    #[test]
    fn duplicate_handler_fails_registration() {
        let result = AppBuilder::new(SpindleConfig::default())
            .handler(MessageKind::StartExecution, Arc::new(Noop))
            .unwrap()
            .handler(MessageKind::StartExecution, Arc::new(Noop));
        assert!(result.is_err());
    }
}
