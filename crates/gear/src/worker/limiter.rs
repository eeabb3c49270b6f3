//! Per-task-type concurrency limiter

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The limiter's semaphore was closed
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

struct LimiterState {
    semaphore: Arc<Semaphore>,
    limit: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Bounded permit pool gating concurrent lifecycle runs
///
/// A permit is taken before the next payload is pulled and released only
/// after its feedback has been reported. Tracks current and peak usage.
///
/// # Example
///
/// ```
/// use gear::worker::ConcurrencyLimiter;
///
/// # tokio_test::block_on(async {
/// let limiter = ConcurrencyLimiter::new(2);
/// let permit = limiter.acquire().await.unwrap();
/// assert_eq!(limiter.in_flight(), 1);
/// drop(permit);
/// assert_eq!(limiter.available(), 2);
/// # });
/// ```
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    state: Arc<LimiterState>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `limit` permits (at least 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            state: Arc::new(LimiterState {
                semaphore: Arc::new(Semaphore::new(limit)),
                limit,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a permit
    pub async fn acquire(&self) -> Result<LimiterPermit, LimiterClosed> {
        let permit = Arc::clone(&self.state.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);

        Ok(LimiterPermit {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    /// Configured number of permits
    pub fn limit(&self) -> usize {
        self.state.limit
    }

    /// Permits currently held
    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits ever held at once
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.state.semaphore.available_permits()
    }
}

impl std::fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("limit", &self.limit())
            .field("in_flight", &self.in_flight())
            .field("peak", &self.peak())
            .finish()
    }
}

/// A held permit; dropping it releases the slot
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<LimiterState>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_zero_limit_is_clamped() {
        let limiter = ConcurrencyLimiter::new(0);
        assert_eq!(limiter.limit(), 1);
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let limiter = ConcurrencyLimiter::new(3);
        assert_eq!(limiter.available(), 3);

        let a = limiter.acquire().await.unwrap();
        let b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.in_flight(), 2);
        assert_eq!(limiter.available(), 1);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        assert_eq!(limiter.peak(), 2);

        drop(b);
        assert_eq!(limiter.available(), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_acquire_waits_when_exhausted() {
        let limiter = ConcurrencyLimiter::new(1);
        let held = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(limiter.peak(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_peak_never_exceeds_limit() {
        let limiter = ConcurrencyLimiter::new(3);

        let mut handles = vec![];
        for _ in 0..20 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(limiter.peak(), 3);
        assert_eq!(limiter.in_flight(), 0);
    }
}
