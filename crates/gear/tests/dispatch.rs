//! End-to-end dispatch behaviour against recording in-memory brokers

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, Attempts, Harness};
use gear::prelude::*;
use gear::task::LifecycleState;

/// Sleeps in handle and tracks how many instances run at once
struct Slow {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

#[async_trait]
impl Task for Slow {
    async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrency_limit_bounds_parallel_runs() {
    let harness = Harness::new();
    let active = Arc::new(AtomicUsize::new(0));
    let max_active = Arc::new(AtomicUsize::new(0));

    let (a, m) = (Arc::clone(&active), Arc::clone(&max_active));
    let task_type = harness
        .manager
        .register(
            "echo",
            task_factory(move |_| {
                Ok(Slow {
                    active: Arc::clone(&a),
                    max_active: Arc::clone(&m),
                })
            }),
            2,
        )
        .unwrap();

    for n in 0..6 {
        harness.manager.submit("echo", json!(n)).await.unwrap();
    }
    harness.manager.start_all(["echo"], false).await.unwrap();

    let broker = harness.broker("echo");
    wait_until(|| broker.deletes().len() == 6).await;

    assert!(max_active.load(Ordering::SeqCst) <= 2);
    assert_eq!(task_type.limiter().peak(), 2);
    assert!(broker.rollbacks().is_empty());
    assert_eq!(broker.inner().pending_len(), 0);
    assert_eq!(broker.inner().working_len(), 0);

    harness.manager.shutdown().await;
}

/// Rejects the first attempt at each payload, accepts the second
struct SecondTime {
    attempts: Attempts,
}

#[async_trait]
impl Task for SecondTime {
    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(self.attempts.record(ctx.payload()) >= 2)
    }
}

#[test_log::test(tokio::test)]
async fn handle_false_redelivers_until_accepted() {
    let harness = Harness::new();
    let attempts = Attempts::default();
    let shared = attempts.clone();
    harness
        .manager
        .register(
            "retry",
            task_factory(move |_| {
                Ok(SecondTime {
                    attempts: shared.clone(),
                })
            }),
            1,
        )
        .unwrap();

    harness.manager.submit("retry", json!({"id": 1})).await.unwrap();
    harness.manager.start_all(["retry"], false).await.unwrap();

    let broker = harness.broker("retry");
    wait_until(|| broker.deletes().len() == 1).await;

    assert_eq!(attempts.get(&json!({"id": 1})), 2);
    assert_eq!(broker.rollbacks(), vec![json!({"id": 1})]);
    assert_eq!(broker.deletes(), vec![json!({"id": 1})]);

    harness.manager.shutdown().await;
}

/// Fetch outlives its deadline on the first attempt only
struct SlowFirstFetch {
    attempts: Attempts,
    calls: Arc<parking_lot::Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Task for SlowFirstFetch {
    fn timeout(&self) -> Option<Duration> {
        Some(Duration::from_millis(50))
    }

    async fn fetch(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        if self.attempts.record(ctx.payload()) == 1 {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }

    async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        self.calls.lock().push("handle");
        Ok(true)
    }

    async fn failure(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        self.calls.lock().push("failure");
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn fetch_timeout_rolls_back_and_retries() {
    let harness = Harness::new();
    let attempts = Attempts::default();
    let calls = Arc::new(parking_lot::Mutex::new(vec![]));
    let (shared, log) = (attempts.clone(), Arc::clone(&calls));
    harness
        .manager
        .register(
            "page",
            task_factory(move |_| {
                Ok(SlowFirstFetch {
                    attempts: shared.clone(),
                    calls: Arc::clone(&log),
                })
            }),
            1,
        )
        .unwrap();

    harness.manager.submit("page", json!("https://example.com/1")).await.unwrap();
    harness.manager.start_all(["page"], false).await.unwrap();

    let broker = harness.broker("page");
    wait_until(|| broker.deletes().len() == 1).await;

    assert_eq!(broker.rollbacks().len(), 1);
    assert_eq!(*calls.lock(), vec!["failure", "handle"]);

    harness.manager.shutdown().await;
}

/// Panics on the first attempt at each payload
struct PanicsOnce {
    attempts: Attempts,
}

#[async_trait]
impl Task for PanicsOnce {
    async fn handle(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        if self.attempts.record(ctx.payload()) == 1 {
            panic!("handler bug");
        }
        Ok(true)
    }
}

#[test_log::test(tokio::test)]
async fn panicking_handler_is_contained_and_rolled_back() {
    let harness = Harness::new();
    let attempts = Attempts::default();
    let shared = attempts.clone();
    let task_type = harness
        .manager
        .register(
            "fragile",
            task_factory(move |_| {
                Ok(PanicsOnce {
                    attempts: shared.clone(),
                })
            }),
            2,
        )
        .unwrap();

    for n in 0..3 {
        harness.manager.submit("fragile", json!(n)).await.unwrap();
    }
    harness.manager.start_all(["fragile"], false).await.unwrap();

    let broker = harness.broker("fragile");
    wait_until(|| broker.deletes().len() == 3).await;

    assert_eq!(broker.rollbacks().len(), 3);
    assert_eq!(attempts.total(), 6);
    assert!(harness.manager.is_serving("fragile"));

    // The idle loop holds one permit while it waits in pull; once stopped,
    // every permit is back despite the panics
    harness.manager.shutdown().await;
    wait_until(|| task_type.limiter().in_flight() == 0).await;
    assert_eq!(task_type.limiter().available(), 2);
}

struct Accept;

#[async_trait]
impl Task for Accept {
    async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(true)
    }
}

#[test_log::test(tokio::test)]
async fn restore_on_start_recovers_stranded_payloads() {
    let harness = Harness::new();
    harness
        .manager
        .register("crawl", task_factory(|_| Ok(Accept)), 1)
        .unwrap();

    // Simulate a crash: payload pulled but never acknowledged
    let broker = harness.broker("crawl");
    broker.push(json!("stranded")).await.unwrap();
    broker.inner().pull().await.unwrap();
    assert_eq!(broker.inner().working_len(), 1);

    harness.manager.start_all(["crawl"], true).await.unwrap();
    wait_until(|| broker.deletes().len() == 1).await;

    assert_eq!(broker.deletes(), vec![json!("stranded")]);
    assert_eq!(broker.inner().working_len(), 0);

    harness.manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn without_restore_stranded_payloads_stay_in_working() {
    let harness = Harness::new();
    harness
        .manager
        .register("crawl", task_factory(|_| Ok(Accept)), 1)
        .unwrap();

    let broker = harness.broker("crawl");
    broker.push(json!("stranded")).await.unwrap();
    broker.inner().pull().await.unwrap();
    broker.push(json!("fresh")).await.unwrap();

    harness.manager.start_all(["crawl"], false).await.unwrap();
    wait_until(|| broker.deletes().len() == 1).await;

    assert_eq!(broker.deletes(), vec![json!("fresh")]);
    assert_eq!(broker.inner().working_snapshot(), vec![json!("stranded")]);

    harness.manager.shutdown().await;
}

/// Submits `n - 1` to itself from `success` until zero
struct Countdown {
    n: u64,
}

#[async_trait]
impl Task for Countdown {
    async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(true)
    }

    async fn success(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
        if self.n > 0 {
            ctx.submit(ctx.task_type(), json!(self.n - 1)).await?;
        }
        Ok(())
    }
}

#[test_log::test(tokio::test)]
async fn success_hook_can_chain_submissions() {
    let harness = Harness::new();
    harness
        .manager
        .register("countdown", typed_factory(|n: u64| Countdown { n }), 1)
        .unwrap();

    harness.manager.submit("countdown", json!(3)).await.unwrap();
    harness.manager.start_all(["countdown"], false).await.unwrap();

    let broker = harness.broker("countdown");
    wait_until(|| broker.deletes().len() == 4).await;

    assert_eq!(broker.deletes(), vec![json!(3), json!(2), json!(1), json!(0)]);

    harness.manager.shutdown().await;
}

/// Rejects even payloads on their first attempt
struct EvenFailsOnce {
    attempts: Attempts,
}

#[async_trait]
impl Task for EvenFailsOnce {
    async fn check(&mut self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let n: u64 = ctx.payload_as()?;
        Ok(n % 2 == 1 || self.attempts.record(ctx.payload()) > 1)
    }

    async fn handle(&mut self, _ctx: &TaskContext) -> Result<bool, TaskError> {
        Ok(true)
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn every_delivery_gets_exactly_one_feedback() {
    let harness = Harness::new();
    let attempts = Attempts::default();
    let shared = attempts.clone();
    harness
        .manager
        .register(
            "mixed",
            task_factory(move |_| {
                Ok(EvenFailsOnce {
                    attempts: shared.clone(),
                })
            }),
            3,
        )
        .unwrap();

    for n in 0..10u64 {
        harness.manager.submit("mixed", json!(n)).await.unwrap();
    }
    harness.manager.start_all(["mixed"], false).await.unwrap();

    let broker = harness.broker("mixed");
    wait_until(|| broker.deletes().len() == 10).await;

    assert_eq!(broker.rollbacks().len(), 5);
    assert_eq!(broker.pulls(), broker.deletes().len() + broker.rollbacks().len());

    harness.manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn shutdown_stops_pulling() {
    let harness = Harness::new();
    harness
        .manager
        .register("idle", task_factory(|_| Ok(Accept)), 1)
        .unwrap();

    harness.manager.start_all(["idle"], false).await.unwrap();
    assert_eq!(harness.manager.serving(), vec!["idle"]);

    harness.manager.shutdown().await;
    assert!(!harness.manager.is_serving("idle"));

    harness.manager.submit("idle", json!("late")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let broker = harness.broker("idle");
    assert_eq!(broker.pulls(), 0);
    assert_eq!(broker.inner().pending_len(), 1);

    // Serving again picks the payload up
    harness.manager.start_all(["idle"], false).await.unwrap();
    wait_until(|| broker.deletes().len() == 1).await;
    harness.manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn lifecycle_report_trail_for_direct_runs() {
    let manager = Manager::in_memory();
    let ctx = TaskContext::new("echo", json!(1), manager.submitter());
    let report = gear::Lifecycle::new(Box::new(Accept), ctx).run().await;

    assert!(report.is_success());
    assert_eq!(report.trail.first(), Some(&LifecycleState::Created));
    assert_eq!(report.final_state(), Some(LifecycleState::Done { success: true }));
    assert!(report.elapsed() >= chrono::Duration::zero());
}
