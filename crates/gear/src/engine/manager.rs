//! Manager: registration, submission and dispatch startup

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::registry::{RegistryError, Submitter, TaskFactory, TaskRegistry, TaskType};
use crate::broker::{Broker, BrokerError, InMemoryBroker, Payload};
use crate::worker::{DispatchConfig, Dispatcher};

/// Builds the broker instance backing a task type, keyed by its name
pub type BrokerFactory = Arc<dyn Fn(&str) -> Arc<dyn Broker> + Send + Sync>;

/// Manager errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// Registry error (duplicate or unknown task type)
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Broker error
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A dispatch loop for this task type is already running
    #[error("task type {0} is already being served")]
    AlreadyServing(String),
}

/// Owns the task types and their dispatch loops
///
/// # Example
///
/// ```ignore
/// use gear::prelude::*;
///
/// let manager = Manager::in_memory();
/// manager.register("echo", typed_factory(|text: String| Echo { text }), 2)?;
///
/// manager.submit("echo", json!("hello")).await?;
/// manager.start_all(["echo"], true).await?;
///
/// // ... later
/// manager.shutdown().await;
/// ```
pub struct Manager {
    registry: TaskRegistry,
    broker_factory: BrokerFactory,
    config: DispatchConfig,
    shutdown_tx: watch::Sender<bool>,
    dispatchers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Manager {
    /// Create a manager that builds brokers with `broker_factory`
    pub fn new<F>(broker_factory: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Broker> + Send + Sync + 'static,
    {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry: TaskRegistry::new(),
            broker_factory: Arc::new(broker_factory),
            config: DispatchConfig::default(),
            shutdown_tx,
            dispatchers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager backed by [`InMemoryBroker`]s
    pub fn in_memory() -> Self {
        Self::new(|name: &str| Arc::new(InMemoryBroker::new(name)) as Arc<dyn Broker>)
    }

    /// Set the dispatch configuration used by loops started afterwards
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Handle for enqueueing payloads without borrowing the manager
    pub fn submitter(&self) -> Submitter {
        self.registry.submitter()
    }

    /// Register a task type
    ///
    /// Fails with `DuplicateTaskType` if `name` is taken and with
    /// `InvalidConcurrency` if `concurrency_limit` is zero.
    #[instrument(skip(self, factory))]
    pub fn register(
        &self,
        name: &str,
        factory: TaskFactory,
        concurrency_limit: usize,
    ) -> Result<Arc<TaskType>, ManagerError> {
        if self.registry.contains(name) {
            return Err(RegistryError::DuplicateTaskType(name.to_string()).into());
        }

        let broker = (self.broker_factory)(name);
        let task_type = TaskType::new(name, broker, factory, concurrency_limit)?;
        let task_type = self.registry.insert(task_type)?;

        info!(task_type = %name, concurrency_limit, "Registered task type");
        Ok(task_type)
    }

    /// Look up a registered task type
    pub fn task_type(&self, name: &str) -> Result<Arc<TaskType>, ManagerError> {
        Ok(self.registry.get(name)?)
    }

    /// Enqueue a payload onto the named task type's pending partition
    #[instrument(skip(self, payload))]
    pub async fn submit(&self, name: &str, payload: Payload) -> Result<(), ManagerError> {
        self.registry.submitter().submit(name, payload).await
    }

    /// Initialize every registered broker
    pub async fn init_all(&self) -> Result<(), ManagerError> {
        for task_type in self.registry.task_types() {
            task_type.broker().init().await?;
        }
        Ok(())
    }

    /// Start a dispatch loop for each named task type
    ///
    /// Every name is validated before anything starts. For each task type
    /// the broker is initialized and, with `restore_on_start`, payloads
    /// stranded in its working partition are moved back to pending. Returns
    /// once all loops are launched.
    #[instrument(skip(self, names))]
    pub async fn start_all<I, S>(&self, names: I, restore_on_start: bool) -> Result<(), ManagerError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut task_types = vec![];
        for name in names {
            let name = name.as_ref();
            if !seen.insert(name.to_string()) {
                continue;
            }
            if self.is_serving(name) {
                return Err(ManagerError::AlreadyServing(name.to_string()));
            }
            task_types.push(self.registry.get(name)?);
        }

        for task_type in task_types {
            let broker = task_type.broker();
            broker.init().await?;

            if restore_on_start {
                let restored = broker.restore().await?;
                if restored > 0 {
                    info!(task_type = %task_type.name(), restored, "Restored stranded payloads");
                }
            }

            let name = task_type.name().to_string();
            let dispatcher = Dispatcher::new(
                task_type,
                self.registry.submitter(),
                self.config.clone(),
                self.shutdown_tx.subscribe(),
            );
            let handle = tokio::spawn(dispatcher.run());

            info!(task_type = %name, "Dispatch loop started");
            self.dispatchers.lock().insert(name, handle);
        }

        Ok(())
    }

    /// Whether a dispatch loop for `name` is running
    pub fn is_serving(&self, name: &str) -> bool {
        self.dispatchers
            .lock()
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Names of task types with a running dispatch loop, sorted
    pub fn serving(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .dispatchers
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Stop every dispatch loop at its next suspension point
    ///
    /// Lifecycle runs already in flight keep running and still report
    /// feedback. Payloads interrupted by a process exit are recovered by
    /// `restore` on the next start.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Stopping dispatch loops");
        self.shutdown_tx.send_replace(true);

        let handles: Vec<_> = self.dispatchers.lock().drain().collect();
        for (name, handle) in handles {
            match handle.await {
                Ok(()) => debug!(task_type = %name, "Dispatch loop stopped"),
                Err(e) => warn!(task_type = %name, "Dispatch loop ended abnormally: {}", e),
            }
        }

        // Loops started after this point run until the next shutdown
        self.shutdown_tx.send_replace(false);
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("task_types", &self.registry.names())
            .field("serving", &self.serving())
            .field("config", &self.config)
            .finish()
    }
}
