//! Task handlers and the per-item lifecycle
//!
//! A task type plugs into the engine by implementing [`Task`]. The
//! [`Lifecycle`] driver runs one instance per dequeued payload through
//! `before -> fetch -> check -> handle -> success | failure` and produces a
//! [`LifecycleReport`] that the dispatcher turns into broker feedback.

mod context;
mod definition;
mod lifecycle;

pub use context::TaskContext;
pub use definition::{Task, TaskError};
pub use lifecycle::{Lifecycle, LifecycleReport, LifecycleState, Outcome};
