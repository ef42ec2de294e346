use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::{Message, MessageKind};
use crate::error::{HandlerError, RegistryError};
use crate::queue::{MessageLease, QueueCallback};

/// Processes one kind of control message.
///
/// Handlers must tolerate redelivery: the queue is at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

/// Registry of handlers (message kind -> handler).
///
/// Built during initialization, read-only afterwards, so no locks.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Arc<dyn MessageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        kind: MessageKind,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: MessageKind) -> Option<&Arc<dyn MessageHandler>> {
        self.handlers.get(&kind)
    }

    /// Kinds with no handler; messages of these kinds will fail every
    /// delivery and end up dead-lettered.
    pub fn missing_kinds(&self) -> Vec<MessageKind> {
        MessageKind::ALL
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Runtime executes a message by dispatching to its registered handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, message: &Message) -> Result<(), HandlerError> {
        let kind = message.kind();
        let handler = self
            .registry
            .get(kind)
            .ok_or(HandlerError::HandlerNotFound(kind))?;

        handler.handle(message).await
    }
}

/// Settles each lease from the handler result: `Ok` acks, `Err` fails.
#[async_trait]
impl QueueCallback for Runtime {
    async fn on_message(&self, lease: Box<dyn MessageLease>) {
        let message = lease.message().clone();
        let settled = match self.execute(&message).await {
            Ok(()) => lease.ack().await,
            Err(err) => lease.fail(err.to_string()).await,
        };

        match settled {
            Ok(()) => debug!(identity = %message.identity(), attempt = message.attempts(), "message settled"),
            // The lease already expired or was rescheduled; the queue owns the
            // message again.
            Err(err) => warn!(identity = %message.identity(), error = %err, "could not settle lease"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::TimeDelta;

    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::Execution;
    use crate::queue::{InMemoryQueue, Queue, RetryPolicy};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::failed("stage blew up"));
            }
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(MessageKind::StartExecution, Arc::new(Counting::default()))
            .unwrap();
        let err = registry
            .register(MessageKind::StartExecution, Arc::new(Counting::default()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateHandler(MessageKind::StartExecution)));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.missing_kinds().len(), 4);
    }

    #[tokio::test]
    async fn runtime_errors_when_handler_missing() {
        let runtime = Runtime::new(Arc::new(HandlerRegistry::new()));
        let err = runtime
            .execute(&Message::resume(Execution::pipeline("checkout")))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::HandlerNotFound(MessageKind::ResumeExecution)));
    }

    #[tokio::test]
    async fn successful_handler_acks_lease() {
        let handler = Arc::new(Counting::default());
        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::StartExecution, handler.clone()).unwrap();
        let runtime = Runtime::new(Arc::new(registry));

        let queue = InMemoryQueue::new(QueueConfig::default(), Vec::new());
        queue
            .push(Message::start(Execution::pipeline("checkout")), TimeDelta::zero())
            .await
            .unwrap();

        assert_eq!(queue.poll(&runtime).await.unwrap(), 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.counts().await.acked, 1);
    }

    #[tokio::test]
    async fn failing_handler_fails_lease() {
        let handler = Arc::new(Counting {
            fail: true,
            ..Counting::default()
        });
        let mut registry = HandlerRegistry::new();
        registry.register(MessageKind::StartExecution, handler.clone()).unwrap();
        let runtime = Runtime::new(Arc::new(registry));

        let queue = InMemoryQueue::new(
            QueueConfig {
                max_attempts: 2,
                retry: RetryPolicy::immediate(),
                ..QueueConfig::default()
            },
            Vec::new(),
        );
        queue
            .push(Message::start(Execution::pipeline("checkout")), TimeDelta::zero())
            .await
            .unwrap();

        assert_eq!(queue.poll(&runtime).await.unwrap(), 1);
        assert_eq!(queue.poll(&runtime).await.unwrap(), 1);
        assert_eq!(queue.poll(&runtime).await.unwrap(), 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        let counts = queue.counts().await;
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.acked, 0);
    }
}
