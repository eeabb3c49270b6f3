//! In-memory implementation of Broker

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::store::{Broker, BrokerError, Payload};

/// Internal queue state
#[derive(Default)]
struct QueueState {
    pending: VecDeque<Payload>,
    working: Vec<Payload>,
    initialized: bool,
}

/// In-memory implementation of Broker
///
/// Pending is a FIFO; working keeps dequeued payloads until they are
/// acknowledged or rolled back. Rolled back and restored payloads are
/// appended to the back of pending. `delete` and `rollback` match payloads
/// by value and remove the first matching entry.
///
/// # Example
///
/// ```
/// use gear::broker::InMemoryBroker;
///
/// let broker = InMemoryBroker::new("echo");
/// assert_eq!(broker.pending_len(), 0);
/// ```
pub struct InMemoryBroker {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
    closed: AtomicBool,
}

impl InMemoryBroker {
    /// Create a new empty broker
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of payloads waiting in pending
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of payloads dequeued but not yet acknowledged
    pub fn working_len(&self) -> usize {
        self.state.lock().working.len()
    }

    /// Copy of the pending partition in dequeue order
    pub fn pending_snapshot(&self) -> Vec<Payload> {
        self.state.lock().pending.iter().cloned().collect()
    }

    /// Copy of the working partition
    pub fn working_snapshot(&self) -> Vec<Payload> {
        self.state.lock().working.clone()
    }

    /// Whether `init` has been called
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Close the broker, waking every suspended `pull` with [`BrokerError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
    }

    fn try_pull(&self) -> Option<Payload> {
        let mut state = self.state.lock();
        let payload = state.pending.pop_front()?;
        state.working.push(payload.clone());
        Some(payload)
    }

    fn take_working(state: &mut QueueState, payload: &Payload) -> Option<Payload> {
        let index = state.working.iter().position(|p| p == payload)?;
        Some(state.working.remove(index))
    }

    fn not_found(&self, partition: &'static str) -> BrokerError {
        BrokerError::NotFound {
            queue: self.name.clone(),
            partition,
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self) -> Result<(), BrokerError> {
        self.state.lock().initialized = true;
        Ok(())
    }

    async fn restore(&self) -> Result<usize, BrokerError> {
        let restored = {
            let mut state = self.state.lock();
            let working = std::mem::take(&mut state.working);
            let count = working.len();
            state.pending.extend(working);
            count
        };

        for _ in 0..restored {
            self.available.notify_one();
        }
        debug!(queue = %self.name, restored, "Restored working payloads");
        Ok(restored)
    }

    async fn push(&self, payload: Payload) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed(self.name.clone()));
        }
        self.state.lock().pending.push_back(payload);
        self.available.notify_one();
        Ok(())
    }

    async fn pull(&self) -> Result<Payload, BrokerError> {
        loop {
            // Register interest before checking the queue so a push between
            // the check and the await is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::SeqCst) {
                return Err(BrokerError::Closed(self.name.clone()));
            }

            if let Some(payload) = self.try_pull() {
                trace!(queue = %self.name, "Pulled payload");
                return Ok(payload);
            }

            notified.await;
        }
    }

    async fn delete(&self, payload: &Payload, from_working: bool) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if from_working {
            Self::take_working(&mut state, payload)
                .map(|_| ())
                .ok_or_else(|| self.not_found("working"))
        } else {
            let index = state
                .pending
                .iter()
                .position(|p| p == payload)
                .ok_or_else(|| self.not_found("pending"))?;
            state.pending.remove(index);
            Ok(())
        }
    }

    async fn rollback(&self, payload: &Payload) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock();
            let payload =
                Self::take_working(&mut state, payload).ok_or_else(|| self.not_found("working"))?;
            state.pending.push_back(payload);
        }
        self.available.notify_one();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("working", &state.working.len())
            .finish()
    }
}
