//! Acknowledge or roll back a payload from its lifecycle outcome

use tracing::{debug, error};

use crate::broker::{Broker, Payload};
use crate::task::LifecycleReport;

/// Delete the payload from the working partition on success, roll it back
/// to pending otherwise
///
/// Exactly one broker call is made per report. Broker errors are logged;
/// the payload then stays in the working partition until the next
/// `restore`.
pub async fn report_outcome(broker: &dyn Broker, payload: &Payload, report: &LifecycleReport) {
    if report.is_success() {
        match broker.delete(payload, true).await {
            Ok(()) => debug!(
                task_type = %report.task_type,
                run_id = %report.run_id,
                "Payload acknowledged"
            ),
            Err(e) => error!(
                task_type = %report.task_type,
                run_id = %report.run_id,
                error = %e,
                "Failed to acknowledge payload"
            ),
        }
    } else {
        match broker.rollback(payload).await {
            Ok(()) => debug!(
                task_type = %report.task_type,
                run_id = %report.run_id,
                "Payload rolled back"
            ),
            Err(e) => error!(
                task_type = %report.task_type,
                run_id = %report.run_id,
                error = %e,
                "Failed to roll back payload"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::task::{LifecycleState, Outcome};
    use chrono::Utc;
    use serde_json::json;

    fn report(outcome: Outcome) -> LifecycleReport {
        LifecycleReport {
            run_id: uuid::Uuid::now_v7(),
            task_type: "echo".to_string(),
            trail: vec![LifecycleState::Done {
                success: outcome == Outcome::Success,
            }],
            outcome,
            error: None,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_success_deletes_from_working() {
        let broker = InMemoryBroker::new("echo");
        broker.push(json!(1)).await.unwrap();
        let payload = broker.pull().await.unwrap();

        report_outcome(&broker, &payload, &report(Outcome::Success)).await;

        assert_eq!(broker.working_len(), 0);
        assert_eq!(broker.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let broker = InMemoryBroker::new("echo");
        broker.push(json!(1)).await.unwrap();
        let payload = broker.pull().await.unwrap();

        report_outcome(&broker, &payload, &report(Outcome::Failure)).await;

        assert_eq!(broker.working_len(), 0);
        assert_eq!(broker.pending_snapshot(), vec![json!(1)]);
    }

    #[tokio::test]
    async fn test_broker_error_is_contained() {
        let broker = InMemoryBroker::new("echo");
        // Never pulled, so rollback has nothing to move
        report_outcome(&broker, &json!(7), &report(Outcome::Failure)).await;
        assert_eq!(broker.pending_len(), 0);
    }
}
