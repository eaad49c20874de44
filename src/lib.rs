//! moneytap: off-chain accrual and synchronization engine for streaming
//! payments.
//!
//! The chain is the source of truth for balances; this crate keeps a
//! deterministic projection of it - per-second accrual math, a daily
//! withdrawal limiter, an idempotent event synchronizer, a reconciliation
//! auditor, and a topic-based broadcast hub feeding live sessions.

#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
