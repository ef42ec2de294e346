use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Instant, sleep};
use tracing::info;

use spindle_core::app::AppBuilder;
use spindle_core::config::SpindleConfig;
use spindle_core::domain::{Execution, Message, MessageAction, MessageKind, StageId};
use spindle_core::error::HandlerError;
use spindle_core::observability::init_tracing;
use spindle_core::queue::{CollectDeadMessages, LogDeadMessages};
use spindle_core::runner::ExecutionRunner;
use spindle_core::runtime::MessageHandler;

/// Fails the first `failures` deliveries, then succeeds.
struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::failed(format!(
                "intentional failure (left={left})"
            )));
        }
        println!("{} handled on attempt {}", message.identity(), message.attempts());
        Ok(())
    }
}

struct PrintHandler;

#[async_trait]
impl MessageHandler for PrintHandler {
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        match message.action() {
            MessageAction::RestartStage { stage_id } => {
                println!("restarting stage {stage_id} of {}", message.execution())
            }
            MessageAction::CancelExecution { user, reason } => println!(
                "{user} cancelled {} ({})",
                message.execution(),
                reason.as_deref().unwrap_or("no reason")
            ),
            _ => println!("{} for {}", message.kind(), message.execution()),
        }
        Ok(())
    }
}

/// Never succeeds, so its messages end up dead-lettered.
struct BrokenHandler;

#[async_trait]
impl MessageHandler for BrokenHandler {
    async fn handle(&self, _message: &Message) -> Result<(), HandlerError> {
        Err(HandlerError::failed("execution repository unreachable"))
    }
}

fn load_config() -> Result<SpindleConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(SpindleConfig::from_path(path)?),
        None => {
            let mut config = SpindleConfig::default();
            config.queue.max_attempts = 3;
            config.queue.ack_timeout = Duration::from_secs(2);
            config.queue.retry.base_delay = Duration::from_millis(50);
            config.worker.workers = 2;
            config.worker.poll_interval = Duration::from_millis(20);
            config.worker.reaper_interval = Duration::from_millis(200);
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // (A) Wire the queue, runner and handlers
    let config = load_config()?;
    let dead = Arc::new(CollectDeadMessages::new());
    let app = AppBuilder::new(config)
        .handler(MessageKind::StartExecution, Arc::new(FlakyHandler::new(2)))?
        .handler(MessageKind::RescheduleExecution, Arc::new(PrintHandler))?
        .handler(MessageKind::RestartStage, Arc::new(PrintHandler))?
        .handler(MessageKind::ResumeExecution, Arc::new(BrokenHandler))?
        .handler(MessageKind::CancelExecution, Arc::new(PrintHandler))?
        .dead_message_handler(Arc::new(LogDeadMessages))
        .dead_message_handler(dead.clone())
        .expect_kinds(&MessageKind::ALL)
        .build()?;

    // (B) Start consuming
    let running = app.start();

    // (C) Send control signals
    let runner = app.runner();
    let pipeline = Execution::pipeline("checkout");
    let orchestration = Execution::orchestration("checkout");
    runner.start(&pipeline).await?;
    runner.reschedule(&pipeline).await?;
    runner.restart(&pipeline, &StageId::new("deploy")).await?;
    runner.unpause(&orchestration).await?;
    runner
        .cancel(&orchestration, "alice", Some("superseded by a newer build"))
        .await?;

    // (D) Wait until nothing is left to deliver, or give up on Ctrl-C / deadline
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        let counts = app.counts().await;
        if counts.pending + counts.ready + counts.in_flight == 0 {
            break;
        }
        if Instant::now() >= deadline {
            info!("deadline reached with messages outstanding");
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sleep(Duration::from_millis(50)) => {}
        }
    }

    let counts = app.counts().await;
    println!("counts: {}", serde_json::to_string(&counts)?);
    for message in dead.messages() {
        println!("dead: {} after {} attempts", message.identity(), message.attempts());
    }

    // (E) Stop the loops and close the queue
    running.shutdown().await;
    Ok(())
}
