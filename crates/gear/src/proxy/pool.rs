use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::duration_millis;

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyPoolConfig {
    /// Credits granted to a newly added endpoint, before its priority
    pub base_credits: i64,

    /// How long `get` sleeps before looking again when the pool is empty
    #[serde(with = "duration_millis")]
    pub empty_retry_interval: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            base_credits: 20,
            empty_retry_interval: Duration::from_secs(1),
        }
    }
}

impl ProxyPoolConfig {
    pub fn with_base_credits(mut self, credits: i64) -> Self {
        self.base_credits = credits;
        self
    }

    pub fn with_empty_retry_interval(mut self, interval: Duration) -> Self {
        self.empty_retry_interval = interval;
        self
    }
}

/// One endpoint and its current balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEntry {
    /// Proxy URL, e.g. `http://10.0.0.1:8080`
    pub address: String,
    pub priority: i64,
    /// May go negative when every endpoint is overdrawn; saturates at the i64 bounds
    pub remaining_credits: i64,
}

/// Credit-weighted proxy selector
///
/// Ties on credits go to the endpoint added first, so selection is
/// deterministic but not strictly fair. Select-and-charge happens under one
/// lock; concurrent `get` calls never both see the same balance.
///
/// Construct one per process and share it behind an `Arc`.
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    entries: Mutex<Vec<ProxyEntry>>,
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new(ProxyPoolConfig::default())
    }
}

impl ProxyPool {
    pub fn new(config: ProxyPoolConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    /// Add `http://{ip}:{port}`, see [`ProxyPool::add_address`]
    pub fn add(&self, ip: &str, port: u16, priority: i64) {
        self.add_address(format!("http://{}:{}", ip, port), priority);
    }

    /// Add an endpoint, or re-announce a known one
    ///
    /// A new endpoint starts with `base_credits + priority`. A known one
    /// takes the new priority and gains `priority` more credits.
    pub fn add_address(&self, address: impl Into<String>, priority: i64) {
        let address = address.into();
        let mut entries = self.entries.lock();

        match entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.priority = priority;
                entry.remaining_credits = entry.remaining_credits.saturating_add(priority);
                debug!(%address, priority, credits = entry.remaining_credits, "Proxy re-announced");
            }
            None => {
                let credits = self.config.base_credits.saturating_add(priority);
                debug!(%address, priority, credits, "Proxy added");
                entries.push(ProxyEntry {
                    address,
                    priority,
                    remaining_credits: credits,
                });
            }
        }
    }

    /// Take the endpoint with the most credits, waiting while the pool is empty
    ///
    /// Never fails; blocks indefinitely if nothing is ever added.
    pub async fn get(&self) -> String {
        loop {
            if let Some(address) = self.try_get() {
                return address;
            }
            trace!(
                retry_in_ms = self.config.empty_retry_interval.as_millis() as u64,
                "Proxy pool empty, waiting"
            );
            tokio::time::sleep(self.config.empty_retry_interval).await;
        }
    }

    /// Take the endpoint with the most credits, or `None` if the pool is empty
    pub fn try_get(&self) -> Option<String> {
        let mut entries = self.entries.lock();

        // First maximum wins; `max_by_key` would return the last one
        let (index, _) = entries.iter().enumerate().fold(None, |best, (i, entry)| match best {
            Some((_, credits)) if credits >= entry.remaining_credits => best,
            _ => Some((i, entry.remaining_credits)),
        })?;

        let entry = &mut entries[index];
        entry.remaining_credits = entry.remaining_credits.saturating_sub(1);
        Some(entry.address.clone())
    }

    /// Refund one credit after a successful use; false if the address is unknown
    pub fn feedback(&self, address: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.address == address) {
            Some(entry) => {
                entry.remaining_credits = entry.remaining_credits.saturating_add(1);
                true
            }
            None => {
                debug!(%address, "Feedback for unknown proxy ignored");
                false
            }
        }
    }

    /// Drop an endpoint; returns it if present
    pub fn remove(&self, address: &str) -> Option<ProxyEntry> {
        let mut entries = self.entries.lock();
        let index = entries.iter().position(|e| e.address == address)?;
        Some(entries.remove(index))
    }

    /// Current balance of an endpoint
    pub fn credits(&self, address: &str) -> Option<i64> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.address == address)
            .map(|e| e.remaining_credits)
    }

    /// Copy of every entry in insertion order
    pub fn snapshot(&self) -> Vec<ProxyEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
