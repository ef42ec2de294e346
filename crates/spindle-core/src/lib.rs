//! spindle-core
//!
//! Execution control over an at-least-once message queue.
//!
//! - **runner**: `ExecutionRunner`, turns start/reschedule/restart/unpause/cancel
//!   into queue messages
//! - **queue**: the `Queue` contract, the in-memory engine, retry and dead letters
//! - **runtime**: handler registry and dispatch of delivered messages
//! - **app**: builder, worker group and reaper loop
//! - **domain**: executions, messages and ids

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod runner;
pub mod runtime;
