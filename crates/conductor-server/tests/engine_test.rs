//! Engine integration tests: the facade driving real workers, recovery,
//! scheduling and monitoring together.

use conductor_config::EngineConfig;
use conductor_core::{Clock, ManualClock, SharedClock, SystemClock};
use conductor_jobs::{
    EntryFilter, JobError, JobSearchQuery, JobStatus, JobTemplate, NewJob, Priority, ScheduleOptions, UnitSpec,
};
use conductor_monitor::{AlertRule, MetricKind};
use conductor_resilience::{Backoff, ExecutionError, RecoveryConfig};
use conductor_server::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn fast_config(concurrency: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.worker.concurrency = concurrency;
    config.worker.poll_interval_ms = 10;
    config.worker.shutdown_timeout_secs = 1;
    config.queue.retry_base_delay_ms = 10;
    config.scheduler.tick_interval_ms = 20;
    config
}

async fn wait_terminal(engine: &Engine, ids: &[conductor_core::JobId]) {
    for _ in 0..300 {
        if ids
            .iter()
            .all(|id| engine.get_job_status(*id).is_some_and(|s| s.is_terminal()))
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_priority_order_with_single_worker() {
    let engine = Engine::new(fast_config(1), SystemClock::shared()).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    engine.register_fn("record", move |payload: Value, _ctx| {
        let record = record.clone();
        async move {
            record.lock().push(payload["n"].as_i64().unwrap_or(-1));
            Ok(Value::Null)
        }
    });

    let ids = vec![
        engine.submit_job(NewJob::new("record").payload(json!({"n": 1})).priority(Priority::Low)).unwrap(),
        engine.submit_job(NewJob::new("record").payload(json!({"n": 2})).priority(Priority::High)).unwrap(),
        engine.submit_job(NewJob::new("record").payload(json!({"n": 3})).priority(Priority::Medium)).unwrap(),
        engine.submit_job(NewJob::new("record").payload(json!({"n": 4})).priority(Priority::High)).unwrap(),
    ];

    engine.start().unwrap();
    wait_terminal(&engine, &ids).await;
    engine.stop().await;

    assert_eq!(*seen.lock(), vec![2, 4, 3, 1]);
    let stats = engine.get_queue_statistics();
    assert_eq!(stats.lifetime.completed, 4);
    assert_eq!(engine.worker_stats().jobs_processed, 4);
}

#[tokio::test]
async fn test_fallback_on_type_error() {
    let engine = Engine::new(fast_config(2), SystemClock::shared()).unwrap();
    engine
        .register_recovery_config(RecoveryConfig::fallback("parse", json!(0)).for_errors(["TypeError"]))
        .unwrap();
    engine.register_fn("parse", |_payload: Value, _ctx| async move {
        Err::<Value, _>(ExecutionError::type_error("not a number"))
    });
    engine.start().unwrap();

    let id = engine.submit_job(NewJob::new("parse")).unwrap();
    wait_terminal(&engine, &[id]).await;
    engine.stop().await;

    let job = engine.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(json!(0)));
    assert!(job.fallback_used);
    assert_eq!(engine.recovery_metrics().total_fallbacks, 1);
}

#[tokio::test]
async fn test_retry_exhaustion_fails_job() {
    let engine = Engine::new(fast_config(2), SystemClock::shared()).unwrap();
    engine
        .register_recovery_config(RecoveryConfig::retry("flaky", 2, 10, Backoff::Exponential))
        .unwrap();
    let calls = Arc::new(Mutex::new(0u32));
    let counter = calls.clone();
    engine.register_fn("flaky", move |_payload: Value, _ctx| {
        let counter = counter.clone();
        async move {
            *counter.lock() += 1;
            Err::<Value, _>(ExecutionError::network("connection refused"))
        }
    });
    engine.start().unwrap();

    let id = engine.submit_job(NewJob::new("flaky")).unwrap();
    wait_terminal(&engine, &[id]).await;
    engine.stop().await;

    let job = engine.get_job(id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert_eq!(*calls.lock(), 3);
    assert_eq!(job.error.unwrap().message, "connection refused");
}

#[tokio::test]
async fn test_timeout_is_terminal() {
    let engine = Engine::new(fast_config(1), SystemClock::shared()).unwrap();
    engine.register_fn("slow", |_payload: Value, _ctx| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Value::Null)
    });
    engine.start().unwrap();

    let id = engine
        .submit_job(NewJob::new("slow").timeout(Duration::from_millis(50)).max_retries(0))
        .unwrap();
    wait_terminal(&engine, &[id]).await;
    engine.stop().await;

    assert_eq!(engine.get_job_status(id), Some(JobStatus::Timeout));
}

#[tokio::test]
async fn test_cancel_and_retry_job() {
    let engine = Engine::new(fast_config(1), SystemClock::shared()).unwrap();
    engine.register_fn("noop", |_payload: Value, _ctx| async move { Ok(Value::Null) });

    let id = engine.submit_job(NewJob::new("noop").tag("nightly")).unwrap();
    assert_eq!(engine.cancel_job(id).unwrap(), JobStatus::Cancelled);
    assert!(matches!(engine.cancel_job(id), Err(JobError::InvalidState { .. })));

    engine.retry_job(id).unwrap();
    assert_eq!(engine.get_job_status(id), Some(JobStatus::Pending));

    engine.start().unwrap();
    wait_terminal(&engine, &[id]).await;
    engine.stop().await;

    assert_eq!(engine.get_job_status(id), Some(JobStatus::Completed));
    let found = engine.search_jobs(&JobSearchQuery::new().tag("nightly"));
    assert_eq!(found.total, 1);
}

#[tokio::test]
async fn test_recurring_schedule_with_manual_clock() {
    let clock = Arc::new(ManualClock::starting_now());
    let shared: SharedClock = clock.clone();
    let engine = Engine::new(fast_config(1), shared).unwrap();

    let entry = engine
        .schedule_recurring(
            "heartbeat",
            clock.now(),
            1000,
            JobTemplate::new("noop", json!({})),
            ScheduleOptions::new().max_runs(3),
        )
        .unwrap();

    for _ in 0..5 {
        engine.scheduler().tick();
        clock.advance_millis(1000);
    }

    let stats = engine.get_queue_statistics();
    assert_eq!(stats.lifetime.submitted, 3);
    let entries = engine.get_scheduled_entries(&EntryFilter::all().enabled(false));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry);
    assert_eq!(entries[0].run_count, 3);

    let removed = engine.cancel_scheduled_entry(entry).unwrap();
    assert_eq!(removed.name, "heartbeat");
    assert!(engine.get_scheduled_entries(&EntryFilter::all()).is_empty());
}

#[tokio::test]
async fn test_scheduler_loop_feeds_workers() {
    let engine = Engine::new(fast_config(2), SystemClock::shared()).unwrap();
    engine.register_fn("noop", |_payload: Value, _ctx| async move { Ok(Value::Null) });
    engine
        .schedule_once(
            "warmup",
            chrono::Utc::now(),
            JobTemplate::new("noop", json!({})),
            ScheduleOptions::new(),
        )
        .unwrap();

    engine.start().unwrap();
    for _ in 0..100 {
        if engine.get_queue_statistics().lifetime.completed == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    engine.stop().await;

    assert_eq!(engine.get_queue_statistics().lifetime.completed, 1);
    assert!(engine.get_scheduled_entries(&EntryFilter::all()).is_empty());
}

#[test]
fn test_resolve_dependencies_rejects_cycle() {
    let engine = Engine::new(EngineConfig::default(), SystemClock::shared()).unwrap();

    let units = vec![
        UnitSpec::new("load").depends_on(["extract"]),
        UnitSpec::new("extract"),
        UnitSpec::new("report").depends_on(["load"]),
    ];
    let order: Vec<&str> = engine
        .resolve_dependencies(&units)
        .unwrap()
        .iter()
        .map(|u| u.name.as_str())
        .collect();
    assert_eq!(order, vec!["extract", "load", "report"]);

    let cycle = vec![UnitSpec::new("a").depends_on(["b"]), UnitSpec::new("b").depends_on(["a"])];
    assert!(matches!(
        engine.resolve_dependencies(&cycle),
        Err(JobError::CycleDependency { .. })
    ));
}

#[tokio::test]
async fn test_run_batch_uses_recovery() {
    let engine = Engine::new(EngineConfig::default(), SystemClock::shared()).unwrap();
    engine
        .register_recovery_config(RecoveryConfig::skip("etl").for_errors(["ValidationError"]))
        .unwrap();

    let units = vec![
        UnitSpec::new("extract"),
        UnitSpec::new("validate").depends_on(["extract"]),
        UnitSpec::new("load").depends_on(["validate"]),
    ];
    let outcome = engine
        .run_batch("etl", &units, |unit, input| {
            let name = unit.name.clone();
            async move {
                match name.as_str() {
                    "validate" => Err(ExecutionError::validation("bad row")),
                    "load" => Ok(json!(input.values.len())),
                    _ => Ok(json!("rows")),
                }
            }
        })
        .await
        .unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.skipped, vec!["validate".to_string()]);
    assert_eq!(outcome.values.get("extract"), Some(&json!("rows")));
}

#[tokio::test]
async fn test_backlog_alert_and_acknowledge() {
    let clock = Arc::new(ManualClock::starting_now());
    let mut config = fast_config(1);
    config
        .monitor
        .rules
        .push(AlertRule::new("small_backlog", MetricKind::QueueBacklog, 2.0));
    let engine = Engine::new(config, clock.clone()).unwrap();

    for _ in 0..3 {
        engine.submit_job(NewJob::new("noop")).unwrap();
    }

    let health = engine.get_system_health();
    assert_eq!(health.queue.metrics.get("pending").copied(), Some(3.0));

    let fired = engine.monitor().evaluate_alerts().await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].alert_type, "small_backlog");

    // cooldown suppresses the next evaluation
    clock.advance(Duration::from_secs(30));
    let _ = engine.get_system_health();
    assert!(engine.monitor().evaluate_alerts().await.is_empty());

    let active = engine.get_active_alerts();
    assert_eq!(active.len(), 1);
    let acked = engine.acknowledge_alert(active[0].id, "ops").unwrap();
    assert!(acked.acknowledged);
    assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));
}

#[tokio::test]
async fn test_progress_tracking() {
    let engine = Engine::new(EngineConfig::default(), SystemClock::shared()).unwrap();
    let tracker = engine.progress().track("import");
    tracker.start(4).unwrap();
    tracker.advance(2).unwrap();
    assert!((tracker.percentage() - 50.0).abs() < f64::EPSILON);
    assert_eq!(engine.progress().snapshots().len(), 1);
}

#[tokio::test]
async fn test_lifecycle() {
    let engine = Engine::new(fast_config(1), SystemClock::shared()).unwrap();
    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(engine.start().is_err());

    // stopping before the background loops are polled must not stall
    tokio::time::timeout(Duration::from_secs(1), engine.stop())
        .await
        .expect("engine stop waited on a background loop");
    assert!(!engine.is_running());
    assert!(!engine.scheduler().is_running());
    assert!(!engine.monitor().is_running());
    engine.stop().await;

    assert!(matches!(
        engine.submit_job(NewJob::new("noop")),
        Err(JobError::ShuttingDown)
    ));
}
