use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use spindle_core::app::{ReaperLoop, WorkerGroup};
use spindle_core::config::{QueueConfig, WorkerConfig};
use spindle_core::domain::{Execution, Message, MessageKind};
use spindle_core::error::HandlerError;
use spindle_core::observability::QueueCounts;
use spindle_core::queue::{
    CollectDeadMessages, DeadMessageHandler, InMemoryQueue, MessageLease, Queue, QueueCallback,
};
use spindle_core::runner::{ExecutionRunner, QueueExecutionRunner};
use spindle_core::runtime::{HandlerRegistry, MessageHandler, Runtime};

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageHandler for Recording {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Keeps every lease without settling it.
#[derive(Default)]
struct Hoarder {
    held: Mutex<Vec<Box<dyn MessageLease>>>,
}

#[async_trait]
impl QueueCallback for Hoarder {
    async fn on_message(&self, lease: Box<dyn MessageLease>) {
        self.held.lock().unwrap().push(lease);
    }
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        workers: 3,
        batch_size: 2,
        poll_interval: Duration::from_millis(5),
        reaper_interval: Duration::from_millis(10),
    }
}

async fn wait_for(queue: &InMemoryQueue, done: impl Fn(&QueueCounts) -> bool) -> QueueCounts {
    for _ in 0..300 {
        let counts = queue.counts().await;
        if done(&counts) {
            return counts;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached: {:?}", queue.counts().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_group_acks_every_signal_once() {
    let handler = Arc::new(Recording::default());
    let mut registry = HandlerRegistry::new();
    for kind in MessageKind::ALL {
        registry.register(kind, handler.clone()).unwrap();
    }
    let runtime = Arc::new(Runtime::new(Arc::new(registry)));

    let queue = Arc::new(InMemoryQueue::new(QueueConfig::default(), Vec::new()));
    let runner = QueueExecutionRunner::new(queue.clone());
    let executions: Vec<Execution> = (0..10).map(|_| Execution::pipeline("checkout")).collect();
    for execution in &executions {
        runner.start(execution).await.unwrap();
        runner.cancel(execution, "alice", None).await.unwrap();
    }

    let workers = WorkerGroup::spawn(&worker_config(), queue.clone(), runtime);
    assert_eq!(workers.len(), 3);

    let counts = wait_for(&queue, |c| c.acked == 20).await;
    workers.shutdown_and_join().await;

    assert_eq!(counts.pending + counts.ready + counts.in_flight, 0);
    assert_eq!(counts.dead, 0);
    let seen = handler.seen.lock().unwrap();
    assert_eq!(seen.len(), 20);
    let identities: HashSet<_> = seen.iter().map(Message::identity).collect();
    assert_eq!(identities.len(), 20);
    assert!(seen.iter().all(|message| message.attempts() == 1));
}

#[tokio::test]
async fn reaper_dead_letters_an_abandoned_lease_without_polling() {
    let dead = Arc::new(CollectDeadMessages::new());
    let queue = Arc::new(InMemoryQueue::new(
        QueueConfig {
            ack_timeout: Duration::from_millis(20),
            max_attempts: 1,
            ..QueueConfig::default()
        },
        vec![dead.clone() as Arc<dyn DeadMessageHandler>],
    ));
    let runner = QueueExecutionRunner::new(queue.clone());
    runner.unpause(&Execution::orchestration("checkout")).await.unwrap();

    let hoarder = Hoarder::default();
    assert_eq!(queue.poll(&hoarder).await.unwrap(), 1);

    let reaper = ReaperLoop::spawn(queue.clone(), Duration::from_millis(10));
    let counts = wait_for(&queue, |c| c.dead == 1).await;
    reaper.shutdown_and_join().await;

    assert_eq!(counts.in_flight, 0);
    let dead = dead.messages();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].kind(), MessageKind::ResumeExecution);

    let stale = hoarder.held.lock().unwrap().pop().unwrap();
    assert!(stale.ack().await.is_err());
}

#[tokio::test]
async fn workers_stop_when_queue_closes() {
    let queue = Arc::new(InMemoryQueue::new(QueueConfig::default(), Vec::new()));
    let runtime = Arc::new(Runtime::new(Arc::new(HandlerRegistry::new())));
    let workers = WorkerGroup::spawn(&worker_config(), queue.clone(), runtime);

    queue.close().await;
    tokio::time::timeout(Duration::from_secs(2), workers.shutdown_and_join())
        .await
        .unwrap();
}
