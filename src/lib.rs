#![forbid(unsafe_code)]

//! Delayed one-time follow-up notifications with a durable dedup ledger.

pub mod channel;
pub mod config;
pub mod engine;
pub mod errors;
pub mod models;
pub mod persistence;
pub mod responder;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
