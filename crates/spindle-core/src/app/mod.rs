//! App - wiring and background loops.
//!
//! - **AppBuilder**: builds the queue, runner and handler runtime from config
//! - **WorkerGroup**: consumers that poll the queue and run handlers
//! - **ReaperLoop**: redelivers messages whose lease expired

pub mod builder;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, BuildError, RunningApp};
pub use self::reaper_loop::ReaperLoop;
pub use self::worker_loop::WorkerGroup;
