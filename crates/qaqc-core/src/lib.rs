//! qaqc-core library.
//!
//! Decides, once per invocation, which sites get an automated data QAQC run
//! and which need a human review ticket, then records every decision.
//!
//! # Conventions
//!
//! - **Errors**: engine operations return [`error::QaqcError`]; store
//!   accessors use `anyhow::Result` internally.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod audit_log;
pub mod classify;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod resolution;
pub mod review;
pub mod store;
pub mod timestamp;
