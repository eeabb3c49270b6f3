//! Pull/launch loop for one task type

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::Backoff;
use super::feedback::report_outcome;
use super::limiter::LimiterPermit;
use crate::broker::{BrokerError, Payload};
use crate::config::duration_millis;
use crate::engine::{Submitter, TaskType};
use crate::task::{Lifecycle, LifecycleReport, TaskContext, TaskError};

/// Dispatch loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// First wait after a broker error
    #[serde(with = "duration_millis")]
    pub min_backoff: Duration,

    /// Ceiling for the wait between retries
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,

    /// Growth factor applied after each consecutive error
    pub backoff_multiplier: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl DispatchConfig {
    pub fn with_min_backoff(mut self, interval: Duration) -> Self {
        self.min_backoff = interval;
        self
    }

    pub fn with_max_backoff(mut self, interval: Duration) -> Self {
        self.max_backoff = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(self.min_backoff, self.max_backoff, self.backoff_multiplier)
    }
}

/// Serves one task type until shutdown
///
/// Each iteration takes a permit, pulls a payload and launches a lifecycle
/// run that holds the permit until feedback has been reported. Shutdown is
/// observed while waiting for either; runs already launched are not
/// cancelled.
pub struct Dispatcher {
    task_type: Arc<TaskType>,
    submitter: Submitter,
    config: DispatchConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        task_type: Arc<TaskType>,
        submitter: Submitter,
        config: DispatchConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_type,
            submitter,
            config,
            shutdown_rx,
        }
    }

    /// Run the loop; returns when shutdown is signaled or the broker closes
    #[instrument(skip(self), fields(task_type = %self.task_type.name()))]
    pub async fn run(mut self) {
        let mut backoff = self.config.backoff();
        info!(
            concurrency_limit = self.task_type.concurrency_limit(),
            "Dispatch loop running"
        );

        loop {
            if self.stop_requested() {
                break;
            }

            let permit = tokio::select! {
                permit = self.task_type.limiter().acquire() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "Concurrency limiter unavailable");
                        break;
                    }
                },
                _ = self.shutdown_rx.changed() => continue,
            };

            let pulled = tokio::select! {
                pulled = self.task_type.broker().pull() => pulled,
                _ = self.shutdown_rx.changed() => continue,
            };

            match pulled {
                Ok(payload) => {
                    backoff.reset();
                    self.launch(payload, permit);
                }
                Err(BrokerError::Closed(name)) => {
                    info!(broker = %name, "Broker closed");
                    break;
                }
                Err(e) => {
                    drop(permit);
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Pull failed, backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown_rx.changed() => {}
                    }
                }
            }
        }

        info!("Dispatch loop stopped");
    }

    /// Shutdown was signaled or the manager holding the sender is gone
    fn stop_requested(&self) -> bool {
        *self.shutdown_rx.borrow() || self.shutdown_rx.has_changed().is_err()
    }

    /// Spawn a lifecycle run for `payload`; the permit is released after feedback
    fn launch(&self, payload: Payload, permit: LimiterPermit) {
        let task_type = Arc::clone(&self.task_type);
        let ctx = TaskContext::new(task_type.name(), payload.clone(), self.submitter.clone());
        let run_id = ctx.run_id();
        debug!(%run_id, "Launching lifecycle run");

        tokio::spawn(async move {
            let report = match task_type.create(payload.clone()) {
                Ok(task) => {
                    // Separate task so a panicking hook surfaces as a JoinError
                    let run = tokio::spawn(Lifecycle::new(task, ctx).run());
                    match run.await {
                        Ok(report) => report,
                        Err(e) => {
                            error!(%run_id, error = %e, "Lifecycle run panicked");
                            LifecycleReport::aborted(
                                run_id,
                                task_type.name(),
                                TaskError::new(e.to_string()).with_kind("panic"),
                            )
                        }
                    }
                }
                Err(error) => Lifecycle::rejected(&ctx, error),
            };

            report_outcome(task_type.broker().as_ref(), &payload, &report).await;
            drop(permit);
        });
    }
}
