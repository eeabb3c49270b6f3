//! Task-type registry and dispatch manager
//!
//! The [`Manager`] is the composition root: it owns the [`TaskRegistry`],
//! builds one broker per task type, and launches a dispatch loop for each
//! task type passed to [`Manager::start_all`].

mod manager;
mod registry;

pub use manager::{BrokerFactory, Manager, ManagerError};
pub use registry::{
    task_factory, typed_factory, RegistryError, Submitter, TaskFactory, TaskRegistry,
    TaskType,
};
