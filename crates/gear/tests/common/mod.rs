//! Shared fixtures for dispatch integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gear::{Broker, BrokerError, InMemoryBroker, Manager, Payload};
use parking_lot::Mutex;

/// In-memory broker that records every feedback call
pub struct RecordingBroker {
    inner: InMemoryBroker,
    pulls: AtomicUsize,
    deletes: Mutex<Vec<Payload>>,
    rollbacks: Mutex<Vec<Payload>>,
}

impl RecordingBroker {
    pub fn new(name: &str) -> Self {
        Self {
            inner: InMemoryBroker::new(name),
            pulls: AtomicUsize::new(0),
            deletes: Mutex::new(vec![]),
            rollbacks: Mutex::new(vec![]),
        }
    }

    pub fn inner(&self) -> &InMemoryBroker {
        &self.inner
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> Vec<Payload> {
        self.deletes.lock().clone()
    }

    pub fn rollbacks(&self) -> Vec<Payload> {
        self.rollbacks.lock().clone()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn init(&self) -> Result<(), BrokerError> {
        self.inner.init().await
    }

    async fn restore(&self) -> Result<usize, BrokerError> {
        self.inner.restore().await
    }

    async fn push(&self, payload: Payload) -> Result<(), BrokerError> {
        self.inner.push(payload).await
    }

    async fn pull(&self) -> Result<Payload, BrokerError> {
        let payload = self.inner.pull().await?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }

    async fn delete(&self, payload: &Payload, from_working: bool) -> Result<(), BrokerError> {
        self.inner.delete(payload, from_working).await?;
        self.deletes.lock().push(payload.clone());
        Ok(())
    }

    async fn rollback(&self, payload: &Payload) -> Result<(), BrokerError> {
        // Record first: the payload becomes pullable as soon as the inner call returns
        self.rollbacks.lock().push(payload.clone());
        self.inner.rollback(payload).await
    }
}

/// A manager whose brokers stay reachable from the test
pub struct Harness {
    pub manager: Manager,
    brokers: Arc<Mutex<HashMap<String, Arc<RecordingBroker>>>>,
}

impl Harness {
    pub fn new() -> Self {
        let brokers: Arc<Mutex<HashMap<String, Arc<RecordingBroker>>>> = Arc::default();
        let registry = Arc::clone(&brokers);
        let manager = Manager::new(move |name: &str| {
            let broker = Arc::new(RecordingBroker::new(name));
            registry.lock().insert(name.to_string(), Arc::clone(&broker));
            broker as Arc<dyn Broker>
        });
        Self { manager, brokers }
    }

    pub fn broker(&self, name: &str) -> Arc<RecordingBroker> {
        Arc::clone(
            self.brokers
                .lock()
                .get(name)
                .expect("task type not registered"),
        )
    }
}

/// Poll `cond` until it holds or five seconds pass
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within 5s");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Per-payload attempt counter shared between task instances
#[derive(Clone, Default)]
pub struct Attempts(Arc<Mutex<HashMap<String, usize>>>);

impl Attempts {
    /// Record an attempt and return its 1-based number
    pub fn record(&self, payload: &Payload) -> usize {
        let mut map = self.0.lock();
        let count = map.entry(payload.to_string()).or_default();
        *count += 1;
        *count
    }

    pub fn get(&self, payload: &Payload) -> usize {
        self.0.lock().get(&payload.to_string()).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.lock().values().sum()
    }
}
