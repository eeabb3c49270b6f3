//! Registry of task types
//!
//! The registry maps task-type names to their broker, handler factory and
//! concurrency limiter. Entries are immutable once registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;

use super::ManagerError;
use crate::broker::{Broker, Payload};
use crate::task::{Task, TaskError};
use crate::worker::ConcurrencyLimiter;

/// Factory building a task instance from a raw payload
pub type TaskFactory = Arc<dyn Fn(Payload) -> Result<Box<dyn Task>, TaskError> + Send + Sync>;

/// Build a factory from a closure over the raw payload
pub fn task_factory<T, F>(build: F) -> TaskFactory
where
    T: Task,
    F: Fn(Payload) -> Result<T, TaskError> + Send + Sync + 'static,
{
    Arc::new(move |payload: Payload| -> Result<Box<dyn Task>, TaskError> {
        Ok(Box::new(build(payload)?))
    })
}

/// Build a factory that deserializes the payload before constructing the task
///
/// # Example
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct CommentPage { id: u64, page: u32 }
///
/// let factory = typed_factory(|input: CommentPage| CommentTask::new(input));
/// ```
pub fn typed_factory<I, T, F>(build: F) -> TaskFactory
where
    I: DeserializeOwned,
    T: Task,
    F: Fn(I) -> T + Send + Sync + 'static,
{
    Arc::new(move |payload: Payload| -> Result<Box<dyn Task>, TaskError> {
        let input: I = serde_json::from_value(payload)?;
        Ok(Box::new(build(input)) as Box<dyn Task>)
    })
}

/// A registered task type
pub struct TaskType {
    name: String,
    broker: Arc<dyn Broker>,
    factory: TaskFactory,
    limiter: ConcurrencyLimiter,
    registered_at: DateTime<Utc>,
}

impl TaskType {
    /// Create a task type; `concurrency_limit` must be at least 1
    pub fn new(
        name: impl Into<String>,
        broker: Arc<dyn Broker>,
        factory: TaskFactory,
        concurrency_limit: usize,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if concurrency_limit == 0 {
            return Err(RegistryError::InvalidConcurrency(name));
        }

        Ok(Self {
            name,
            broker,
            factory,
            limiter: ConcurrencyLimiter::new(concurrency_limit),
            registered_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn concurrency_limit(&self) -> usize {
        self.limiter.limit()
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Build a task instance for a payload
    pub fn create(&self, payload: Payload) -> Result<Box<dyn Task>, TaskError> {
        (self.factory)(payload)
    }
}

impl fmt::Debug for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskType")
            .field("name", &self.name)
            .field("broker", &self.broker.name())
            .field("concurrency_limit", &self.limiter.limit())
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

/// Shared map of task types
///
/// Cloning is cheap; clones see the same entries.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    task_types: Arc<RwLock<HashMap<String, Arc<TaskType>>>>,
}

impl TaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task type; fails if the name is taken
    pub fn insert(&self, task_type: TaskType) -> Result<Arc<TaskType>, RegistryError> {
        let mut task_types = self.task_types.write();
        if task_types.contains_key(task_type.name()) {
            return Err(RegistryError::DuplicateTaskType(task_type.name));
        }

        let task_type = Arc::new(task_type);
        task_types.insert(task_type.name().to_string(), Arc::clone(&task_type));
        Ok(task_type)
    }

    /// Look up a task type by name
    pub fn get(&self, name: &str) -> Result<Arc<TaskType>, RegistryError> {
        self.task_types
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTaskType(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.task_types.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.task_types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_types.read().is_empty()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.task_types.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All registered task types
    pub fn task_types(&self) -> Vec<Arc<TaskType>> {
        self.task_types.read().values().cloned().collect()
    }

    /// Handle for enqueueing payloads from inside hooks
    pub fn submitter(&self) -> Submitter {
        Submitter {
            registry: self.clone(),
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.names())
            .finish()
    }
}

/// Enqueues payloads onto registered task types
#[derive(Clone, Debug)]
pub struct Submitter {
    registry: TaskRegistry,
}

impl Submitter {
    /// Push a payload onto the named task type's pending partition
    pub async fn submit(&self, task_type: &str, payload: Payload) -> Result<(), ManagerError> {
        let task_type = self.registry.get(task_type)?;
        task_type.broker().push(payload).await?;
        Ok(())
    }
}

/// Errors from registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Name already registered
    #[error("task type already registered: {0}")]
    DuplicateTaskType(String),

    /// Name never registered
    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    /// Concurrency limit of zero
    #[error("task type {0} needs a concurrency limit of at least 1")]
    InvalidConcurrency(String),
}
