//! Task execution context

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::broker::Payload;
use crate::engine::{ManagerError, Submitter};

/// Context handed to every hook of a lifecycle run
///
/// Carries the identity of the run and a [`Submitter`] so hooks can
/// schedule follow-up work (the next page of a listing, a retry on another
/// task type, ...) without holding a reference to the manager.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Unique id of this lifecycle run
    run_id: Uuid,

    /// Name of the task type the payload was pulled for
    task_type: String,

    /// Payload as delivered by the broker
    payload: Payload,

    submitter: Submitter,
}

impl TaskContext {
    /// Create a new context for one run
    pub fn new(task_type: impl Into<String>, payload: Payload, submitter: Submitter) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            task_type: task_type.into(),
            payload,
            submitter,
        }
    }

    /// Run id, for correlating log lines
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Task type name
    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    /// Raw payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Deserialize the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Enqueue a payload onto a registered task type
    pub async fn submit(&self, task_type: &str, payload: Payload) -> Result<(), ManagerError> {
        self.submitter.submit(task_type, payload).await
    }
}
