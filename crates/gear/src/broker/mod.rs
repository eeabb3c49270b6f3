//! Broker layer for durable task queues
//!
//! This module provides:
//! - [`Broker`] trait: the pending/working queue contract the dispatcher consumes
//! - [`InMemoryBroker`]: a complete in-process implementation used by tests and demos
//!
//! A payload moves `pending -> working` on [`Broker::pull`] and leaves the
//! working partition either through [`Broker::delete`] (acknowledged) or
//! [`Broker::rollback`] (redelivered later). [`Broker::restore`] moves
//! everything stranded in `working` back to `pending` after a crash.

mod memory;
mod store;

pub use memory::InMemoryBroker;
pub use store::{Broker, BrokerError, Payload};
