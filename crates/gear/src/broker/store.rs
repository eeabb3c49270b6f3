//! Broker trait definition

use async_trait::async_trait;

/// Opaque work item carried by a broker
pub type Payload = serde_json::Value;

/// Error type for broker operations
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Connection or backend failure
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Payload was not found in the partition it was expected in
    #[error("payload not found in {partition} partition of queue {queue}")]
    NotFound {
        queue: String,
        partition: &'static str,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Broker was closed while an operation was waiting
    #[error("broker {0} is closed")]
    Closed(String),
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Durable queue with pending and working partitions
///
/// Every payload is in exactly one partition at any observable instant,
/// except for the window between [`pull`](Broker::pull) and its
/// acknowledgement. Implementations must serialize `pull` so that no two
/// callers receive the same delivery.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Queue name, used for logging
    fn name(&self) -> &str;

    /// Establish connections/resources. Must be idempotent.
    async fn init(&self) -> Result<(), BrokerError>;

    /// Move every payload in the working partition back to pending
    ///
    /// Returns the number of payloads restored.
    async fn restore(&self) -> Result<usize, BrokerError>;

    /// Enqueue a payload into the pending partition
    async fn push(&self, payload: Payload) -> Result<(), BrokerError>;

    /// Dequeue one payload from pending into working
    ///
    /// Suspends until a payload is available.
    async fn pull(&self) -> Result<Payload, BrokerError>;

    /// Permanently remove a payload (acknowledge)
    ///
    /// With `from_working` the payload is removed from the working
    /// partition, otherwise from pending.
    async fn delete(&self, payload: &Payload, from_working: bool) -> Result<(), BrokerError>;

    /// Move a payload from working back to pending
    async fn rollback(&self, payload: &Payload) -> Result<(), BrokerError>;
}
