//! # Gear
//!
//! A broker-backed task dispatch engine with at-least-once delivery.
//!
//! ## Features
//!
//! - **Named task types**: each with its own broker queue, handler factory and concurrency cap
//! - **Lifecycle hooks**: before, fetch (with optional deadline), check, handle, success/failure
//! - **At-least-once delivery**: accepted payloads are acknowledged, everything else is rolled back
//! - **Crash recovery**: payloads stranded in a working partition are restored on start
//! - **Proxy pool**: credit-weighted endpoint selection for proxy-backed fetches
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Manager                             │
//! │  (registry of task types, submit, start_all, shutdown)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one per task type
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │  (acquire permit, pull payload, spawn lifecycle run)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Lifecycle                            │
//! │  (drives Task hooks, reports delete / rollback to Broker)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use gear::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Task for Echo {
//!     async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
//!         tracing::info!(payload = %ctx.payload(), "echo");
//!         Ok(true)
//!     }
//! }
//!
//! let manager = Manager::in_memory();
//! manager.register("echo", task_factory(|_| Ok(Echo)), 4)?;
//! manager.submit("echo", json!({"text": "hello"})).await?;
//! manager.start_all(["echo"], true).await?;
//! ```

pub mod broker;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod proxy;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::broker::{Broker, BrokerError, InMemoryBroker, Payload};
    pub use crate::config::GearConfig;
    pub use crate::engine::{
        task_factory, typed_factory, Manager, ManagerError, RegistryError, Submitter, TaskFactory,
    };
    pub use crate::fetch::{FetchError, FetchResult, HttpFetcher, HttpMethod, HttpRequest};
    pub use crate::proxy::{ProxyPool, ProxyPoolConfig};
    pub use crate::task::{LifecycleReport, Outcome, Task, TaskContext, TaskError};
    pub use crate::worker::DispatchConfig;
    pub use async_trait::async_trait;
    pub use serde_json::json;
}

// Re-export key types at crate root
pub use broker::{Broker, BrokerError, InMemoryBroker, Payload};
pub use config::GearConfig;
pub use engine::{Manager, ManagerError, TaskRegistry};
pub use proxy::{ProxyPool, ProxyPoolConfig};
pub use task::{Lifecycle, LifecycleReport, Task, TaskContext, TaskError};
pub use worker::{ConcurrencyLimiter, DispatchConfig};
