//! Dispatch loops and concurrency limiting
//!
//! This module provides:
//! - [`ConcurrencyLimiter`] - Per-task-type bounded permit pool
//! - [`Dispatcher`] - The pull/launch loop for one task type
//! - [`DispatchConfig`] - Backoff applied after broker errors
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Dispatcher (per task type)                 │
//! │                                                              │
//! │   acquire permit ──► broker.pull() ──► spawn lifecycle run   │
//! │         ▲                                     │              │
//! │         │                                     ▼              │
//! │   permit released ◄── delete / rollback ◄── report           │
//! │                                                              │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │       Lifecycle runs (Semaphore-limited)            │    │
//! │  │  [Run 1] [Run 2] ... [Run N = concurrency_limit]    │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The permit is the only backpressure: when all permits are held the loop
//! stops pulling and new payloads accumulate in the broker, not in memory.

mod backoff;
mod dispatcher;
mod feedback;
mod limiter;

pub use backoff::Backoff;
pub use dispatcher::{DispatchConfig, Dispatcher};
pub use feedback::report_outcome;
pub use limiter::{ConcurrencyLimiter, LimiterClosed, LimiterPermit};
