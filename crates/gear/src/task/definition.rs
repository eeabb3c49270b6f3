//! Task trait definition

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TaskContext;
use crate::broker::BrokerError;
use crate::engine::ManagerError;
use crate::fetch::FetchError;

/// Error type for task hook failures
///
/// Any error returned from a hook is contained by the lifecycle driver and
/// turns the run into a failure; it never escapes into the dispatch loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    /// Error message
    pub message: String,

    /// Error kind for programmatic handling (e.g. "timeout", "fetch")
    pub kind: Option<String>,
}

impl TaskError {
    /// Create a new error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
        }
    }

    /// Set the error kind
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Error for a fetch step that exceeded its deadline
    pub fn timeout(limit: Duration) -> Self {
        Self::new(format!("fetch timed out after {limit:?}")).with_kind("timeout")
    }

    /// Whether this error came from a fetch deadline
    pub fn is_timeout(&self) -> bool {
        self.kind.as_deref() == Some("timeout")
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TaskError {}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_kind("payload")
    }
}

impl From<FetchError> for TaskError {
    fn from(err: FetchError) -> Self {
        let kind = if matches!(err, FetchError::Timeout(_)) {
            "timeout"
        } else {
            "fetch"
        };
        Self::new(err.to_string()).with_kind(kind)
    }
}

impl From<BrokerError> for TaskError {
    fn from(err: BrokerError) -> Self {
        Self::new(err.to_string()).with_kind("broker")
    }
}

impl From<ManagerError> for TaskError {
    fn from(err: ManagerError) -> Self {
        Self::new(err.to_string()).with_kind("submit")
    }
}

/// Hooks a task type implements to process one payload
///
/// One instance is built per dequeued payload by the task type's factory
/// and dropped once feedback has been reported. Only [`handle`](Task::handle)
/// is required; the remaining hooks default to no-ops that let the run
/// proceed.
///
/// Hook order is `before -> fetch -> check -> handle`, followed by exactly
/// one of `success` (handle returned `true`) or `failure` (any earlier step
/// failed, or handle returned `false`).
///
/// # Example
///
/// ```ignore
/// use gear::prelude::*;
///
/// struct Echo { text: String }
///
/// #[async_trait]
/// impl Task for Echo {
///     async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
///         println!("{}", self.text);
///         Ok(true)
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + 'static {
    /// Prepare the instance (allocate a proxy, build request metadata)
    async fn before(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Deadline applied to [`fetch`](Task::fetch); `None` means no deadline
    ///
    /// Read after `before` has run, so `before` may set it.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Perform the external I/O and keep its result on the instance
    async fn fetch(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Validate the fetch result; `false` skips `handle` and fails the run
    async fn check(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(true)
    }

    /// Business logic; `true` acknowledges the payload, `false` rolls it back
    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError>;

    /// Called once after `handle` returned `true`
    async fn success(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    /// Called once when the run failed at any step
    async fn failure(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskError::new("boom");
        assert_eq!(err.to_string(), "boom");

        let err = TaskError::new("boom").with_kind("fetch");
        assert_eq!(err.to_string(), "fetch: boom");
    }

    #[test]
    fn test_timeout_error() {
        let err = TaskError::timeout(Duration::from_secs(3));
        assert!(err.is_timeout());
        assert!(err.message.contains("3s"));
    }

    #[test]
    fn test_from_fetch_timeout() {
        let err: TaskError = FetchError::Timeout("http://example.com".into()).into();
        assert!(err.is_timeout());

        let err: TaskError = FetchError::InvalidMethod("TRACE".into()).into();
        assert_eq!(err.kind.as_deref(), Some("fetch"));
    }

    #[test]
    fn test_from_serde_error() {
        let parse: Result<u32, _> = serde_json::from_value(serde_json::json!("nope"));
        let err: TaskError = parse.unwrap_err().into();
        assert_eq!(err.kind.as_deref(), Some("payload"));
    }

    #[test]
    fn test_error_serialization() {
        let err = TaskError::new("bad response").with_kind("check");
        let json = serde_json::to_string(&err).unwrap();
        let parsed: TaskError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, parsed);
    }
}
