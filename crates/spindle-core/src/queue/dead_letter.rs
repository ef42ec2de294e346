//! Dead-letter handlers: where messages go after their last failed attempt.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, error};

use crate::domain::Message;

/// Sink for messages that exhausted their attempt budget.
///
/// Each registered handler sees every dead message exactly once, after the
/// message has been removed from the queue.
#[async_trait]
pub trait DeadMessageHandler: Send + Sync {
    async fn handle(&self, message: &Message);
}

/// Logs dead messages at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDeadMessages;

#[async_trait]
impl DeadMessageHandler for LogDeadMessages {
    async fn handle(&self, message: &Message) {
        error!(
            message_id = %message.id(),
            identity = %message.identity(),
            execution = %message.execution(),
            attempts = message.attempts(),
            "message dead-lettered after exhausting its attempts"
        );
    }
}

/// Keeps dead messages in memory so callers can inspect them.
#[derive(Debug, Default)]
pub struct CollectDeadMessages {
    messages: Mutex<Vec<Message>>,
}

impl CollectDeadMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadMessageHandler for CollectDeadMessages {
    async fn handle(&self, message: &Message) {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.clone());
    }
}

/// Ordered, construction-time-fixed set of dead-letter handlers.
#[derive(Clone, Default)]
pub struct DeadLetters {
    handlers: Vec<Arc<dyn DeadMessageHandler>>,
}

impl DeadLetters {
    pub fn new(handlers: Vec<Arc<dyn DeadMessageHandler>>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &[Arc<dyn DeadMessageHandler>] {
        &self.handlers
    }

    /// Hand `message` to every handler, in registration order.
    pub async fn dispatch(&self, message: &Message) {
        debug!(
            identity = %message.identity(),
            handlers = self.handlers.len(),
            "dispatching dead message"
        );
        for handler in &self.handlers {
            handler.handle(message).await;
        }
    }

    pub async fn dispatch_all(&self, messages: &[Message]) {
        for message in messages {
            self.dispatch(message).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Execution;

    struct Ordered {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl DeadMessageHandler for Ordered {
        async fn handle(&self, _message: &Message) {
            self.log.lock().unwrap().push(self.tag);
        }
    }

    #[tokio::test]
    async fn dispatch_calls_handlers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let letters = DeadLetters::new(vec![
            Arc::new(Ordered { tag: "first", log: Arc::clone(&log) }),
            Arc::new(Ordered { tag: "second", log: Arc::clone(&log) }),
        ]);

        letters.dispatch(&Message::start(Execution::pipeline("checkout"))).await;

        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn collector_keeps_every_message() {
        let collector = CollectDeadMessages::new();
        let a = Message::start(Execution::pipeline("checkout"));
        let b = Message::resume(Execution::pipeline("checkout"));

        collector.handle(&a).await;
        collector.handle(&b).await;
        LogDeadMessages.handle(&a).await;

        assert_eq!(collector.messages(), vec![a, b]);
    }
}
