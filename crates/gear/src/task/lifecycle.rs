//! Lifecycle state machine for one dequeued payload
//!
//! ```text
//! Created ──before()──► BeforeDone ──fetch()──► FetchOk ──check()──► Checked ──handle()──► HandleTrue ──► Done(true)
//!    │                       │                     │                    │
//!    ▼                       ▼                     ▼                    ▼
//! BeforeFailed           FetchFailed          CheckFailed     HandleFalse / HandleFailed
//!    └───────────────────────┴─────────────────────┴────────────────────┴──────────────────────────────► Done(false)
//! ```
//!
//! Every hook error is contained here. `success()` and `failure()` run
//! exactly once between them per instance, and never both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{Task, TaskContext, TaskError};

/// States a lifecycle run passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    BeforeDone,
    BeforeFailed,
    FetchOk,
    FetchFailed,
    Checked,
    CheckFailed,
    HandleTrue,
    HandleFalse,
    HandleFailed,
    Done { success: bool },
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::BeforeDone => write!(f, "before_done"),
            Self::BeforeFailed => write!(f, "before_failed"),
            Self::FetchOk => write!(f, "fetch_ok"),
            Self::FetchFailed => write!(f, "fetch_failed"),
            Self::Checked => write!(f, "checked"),
            Self::CheckFailed => write!(f, "check_failed"),
            Self::HandleTrue => write!(f, "handle_true"),
            Self::HandleFalse => write!(f, "handle_false"),
            Self::HandleFailed => write!(f, "handle_failed"),
            Self::Done { success: true } => write!(f, "done(success)"),
            Self::Done { success: false } => write!(f, "done(failure)"),
        }
    }
}

/// Outcome of a lifecycle run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Run has not finished yet
    Pending,
    /// Payload should be acknowledged
    Success,
    /// Payload should be rolled back for redelivery
    Failure,
}

/// Summary of a finished lifecycle run
#[derive(Debug, Clone)]
pub struct LifecycleReport {
    pub run_id: Uuid,
    pub task_type: String,
    /// Every state entered, in order
    pub trail: Vec<LifecycleState>,
    pub outcome: Outcome,
    /// Last contained hook error, if any
    pub error: Option<TaskError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LifecycleReport {
    /// Whether the payload should be acknowledged
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Final state of the run
    pub fn final_state(&self) -> Option<LifecycleState> {
        self.trail.last().copied()
    }

    /// Wall-clock duration of the run
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Failure report for a run that never reached its outcome hooks
    pub fn aborted(run_id: Uuid, task_type: &str, error: TaskError) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            task_type: task_type.to_string(),
            trail: vec![LifecycleState::Done { success: false }],
            outcome: Outcome::Failure,
            error: Some(error),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Drives one task instance through its hooks
pub struct Lifecycle {
    task: Box<dyn Task>,
    ctx: TaskContext,
    trail: Vec<LifecycleState>,
    outcome: Outcome,
    error: Option<TaskError>,
    started_at: DateTime<Utc>,
}

impl Lifecycle {
    /// Create a lifecycle for a freshly constructed task instance
    pub fn new(task: Box<dyn Task>, ctx: TaskContext) -> Self {
        Self {
            task,
            ctx,
            trail: vec![LifecycleState::Created],
            outcome: Outcome::Pending,
            error: None,
            started_at: Utc::now(),
        }
    }

    /// Report for a payload the task factory refused to build
    ///
    /// No hook runs; the payload is rolled back like any other failure.
    pub fn rejected(ctx: &TaskContext, error: TaskError) -> LifecycleReport {
        warn!(
            task_type = %ctx.task_type(),
            run_id = %ctx.run_id(),
            error = %error,
            "Task factory rejected payload"
        );
        LifecycleReport::aborted(ctx.run_id(), ctx.task_type(), error)
    }

    /// Current outcome (`Pending` until the run finishes)
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Run every hook and return the report
    #[instrument(skip(self), fields(task_type = %self.ctx.task_type(), run_id = %self.ctx.run_id()))]
    pub async fn run(mut self) -> LifecycleReport {
        let handled = self.drive().await;

        let success = if handled {
            match self.task.success(&self.ctx).await {
                Ok(()) => true,
                Err(error) => {
                    // The payload goes back to pending; failure() is not called
                    // because success() already ran for this instance.
                    warn!(error = %error, "success hook failed, rolling back");
                    self.error = Some(error);
                    false
                }
            }
        } else {
            if let Err(error) = self.task.failure(&self.ctx).await {
                warn!(error = %error, "failure hook failed");
                self.error = Some(error);
            }
            false
        };

        self.enter(LifecycleState::Done { success });
        self.outcome = if success {
            Outcome::Success
        } else {
            Outcome::Failure
        };

        LifecycleReport {
            run_id: self.ctx.run_id(),
            task_type: self.ctx.task_type().to_string(),
            trail: self.trail,
            outcome: self.outcome,
            error: self.error,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run before/fetch/check/handle; returns whether handle accepted the payload
    async fn drive(&mut self) -> bool {
        if let Err(error) = self.task.before(&self.ctx).await {
            return self.fail(LifecycleState::BeforeFailed, error);
        }
        self.enter(LifecycleState::BeforeDone);

        let fetched = match self.task.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.task.fetch(&self.ctx))
                .await
                .unwrap_or_else(|_| Err(TaskError::timeout(limit))),
            None => self.task.fetch(&self.ctx).await,
        };
        if let Err(error) = fetched {
            return self.fail(LifecycleState::FetchFailed, error);
        }
        self.enter(LifecycleState::FetchOk);

        match self.task.check(&self.ctx).await {
            Ok(true) => self.enter(LifecycleState::Checked),
            Ok(false) => {
                self.enter(LifecycleState::CheckFailed);
                return false;
            }
            Err(error) => return self.fail(LifecycleState::CheckFailed, error),
        }

        match self.task.handle(&self.ctx).await {
            Ok(true) => {
                self.enter(LifecycleState::HandleTrue);
                true
            }
            Ok(false) => {
                self.enter(LifecycleState::HandleFalse);
                false
            }
            Err(error) => self.fail(LifecycleState::HandleFailed, error),
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        debug!(%state, "Lifecycle transition");
        self.trail.push(state);
    }

    fn fail(&mut self, state: LifecycleState, error: TaskError) -> bool {
        warn!(%state, error = %error, "Lifecycle step failed");
        self.error = Some(error);
        self.enter(state);
        false
    }
}
