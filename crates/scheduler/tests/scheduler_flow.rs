//! Scheduler behavior over a shared in-memory store: ticking, retries,
//! lease exclusion, catch-up, and shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ms_domain::config::SchedulerConfig;
use ms_domain::Error;
use ms_scheduler::store::TaskStore;
use ms_scheduler::{AdminAdapter, Scheduler, Task, TaskFailure, TaskStatus};
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePoolOptions;

async fn shared_store() -> Arc<TaskStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    Arc::new(TaskStore::connect(pool).await.unwrap())
}

fn fast_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.tick_secs = 1;
    config.shutdown_timeout_secs = 5;
    config
}

fn counting_task(id: &str, schedule: &str, counter: Arc<AtomicUsize>) -> Task {
    Task::new(id, id, schedule, move |_token| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    })
}

fn failing_task(id: &str, schedule: &str, counter: Arc<AtomicUsize>) -> Task {
    Task::new(id, id, schedule, move |_token| {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Backend("induced failure".into()))
        })
    })
}

async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = std::time::Instant::now();
    while started.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Registration & validation ──────────────────────────────────────

#[tokio::test]
async fn register_rejects_invalid_tasks() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));

    let empty_id = counting_task("", "@hourly", counter.clone());
    assert!(scheduler.register(empty_id).is_err());

    let bad_schedule = counting_task("t", "@every 5x", counter.clone());
    assert!(scheduler.register(bad_schedule).is_err());

    let bad_cron = counting_task("t", "61 * * * *", counter.clone());
    assert!(scheduler.register(bad_cron).is_err());

    scheduler
        .register(counting_task("t", "@hourly", counter.clone()))
        .unwrap();
    let duplicate = counting_task("t", "@hourly", counter);
    assert!(scheduler.register(duplicate).is_err(), "duplicate id rejected");
}

#[tokio::test]
async fn toggling_respects_skippable() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));

    scheduler
        .register(counting_task("optional", "@hourly", counter.clone()))
        .unwrap();
    scheduler
        .register(counting_task("critical", "@hourly", counter).not_skippable())
        .unwrap();

    scheduler.disable("optional").unwrap();
    assert!(!scheduler.get_task("optional").unwrap().enabled);
    scheduler.enable("optional").unwrap();
    assert!(scheduler.get_task("optional").unwrap().enabled);

    match scheduler.disable("critical") {
        Err(Error::TaskNotSkippable(_)) => {}
        other => panic!("expected TaskNotSkippable, got {other:?}"),
    }
    match scheduler.disable("missing") {
        Err(Error::TaskNotFound(_)) => {}
        other => panic!("expected TaskNotFound, got {other:?}"),
    }
}

// ── Ticking ────────────────────────────────────────────────────────

#[tokio::test]
async fn interval_task_runs_on_cadence() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(counting_task("pulse", "@every 1s", counter.clone()))
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || counter.load(Ordering::SeqCst) >= 2).await,
        "interval task must fire repeatedly"
    );
    scheduler.stop().await;

    let info = scheduler.get_task("pulse").unwrap();
    assert_eq!(info.last_status, Some(TaskStatus::Success));
    assert!(info.run_count >= 2);
    assert!(info.last_run.is_some());
}

#[tokio::test]
async fn disabled_task_does_not_fire() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(counting_task("paused", "@every 1s", counter.clone()))
        .unwrap();
    scheduler.disable("paused").unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.stop().await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

// ── Retries & notification (property 5) ────────────────────────────

#[tokio::test]
async fn retry_budget_notifies_exactly_once() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));
    let failures: Arc<Mutex<Vec<TaskFailure>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = failures.clone();
    scheduler.set_notify_fn(Arc::new(move |failure| {
        sink.lock().push(failure);
    }));

    scheduler
        .register(
            failing_task("doomed", "@every 1h", counter.clone())
                .run_on_start()
                .max_retries(2)
                .retry_delay(Duration::ZERO),
        )
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(8), || !failures.lock().is_empty()).await,
        "terminal failure must notify"
    );
    // Give a would-be extra retry time to (incorrectly) fire.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await;

    let notified = failures.lock();
    assert_eq!(notified.len(), 1, "exactly one notification per exhausted budget");
    assert_eq!(notified[0].task_id, "doomed");
    assert_eq!(notified[0].attempts, 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2, "initial attempt plus one retry");

    let info = scheduler.get_task("doomed").unwrap();
    assert_eq!(info.last_status, Some(TaskStatus::Failed));
    assert_eq!(info.fail_count, 1);
    assert_eq!(info.retry_count, 0, "counter reset after terminal failure");
}

#[tokio::test]
async fn success_during_retry_clears_the_streak() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let calls = Arc::new(AtomicUsize::new(0));
    let failures: Arc<Mutex<Vec<TaskFailure>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = failures.clone();
    scheduler.set_notify_fn(Arc::new(move |failure| {
        sink.lock().push(failure);
    }));

    let call_counter = calls.clone();
    let flaky = Task::new("flaky", "flaky", "@every 1h", move |_token| {
        let calls = call_counter.clone();
        Box::pin(async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::Backend("first attempt fails".into()))
            } else {
                Ok(())
            }
        })
    })
    .run_on_start()
    .max_retries(3)
    .retry_delay(Duration::ZERO);
    scheduler.register(flaky).unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(8), || {
            scheduler.get_task("flaky").unwrap().last_status == Some(TaskStatus::Success)
        })
        .await,
        "retry must succeed"
    );
    scheduler.stop().await;

    let info = scheduler.get_task("flaky").unwrap();
    assert_eq!(info.retry_count, 0);
    assert_eq!(info.fail_count, 0);
    assert_eq!(info.run_count, 1);
    assert!(failures.lock().is_empty(), "no notification after recovery");
}

// ── S4: lease exclusion across nodes ───────────────────────────────

#[tokio::test]
async fn global_task_runs_on_exactly_one_node() {
    let store = shared_store().await;
    let counter = Arc::new(AtomicUsize::new(0));

    let make_task = |counter: Arc<AtomicUsize>| {
        Task::new("daily.cleanup", "daily.cleanup", "@every 1h", move |_token| {
            let counter = counter.clone();
            Box::pin(async move {
                // Hold the lease across both nodes' tick windows.
                tokio::time::sleep(Duration::from_millis(700)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .global()
        .run_on_start()
    };

    let node_a = Scheduler::new(store.clone(), fast_config());
    let node_b = Scheduler::new(store.clone(), fast_config());
    node_a.register(make_task(counter.clone())).unwrap();
    node_b.register(make_task(counter.clone())).unwrap();

    node_a.start().await.unwrap();
    node_b.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    node_a.stop().await;
    node_b.stop().await;

    assert_eq!(
        counter.load(Ordering::SeqCst),
        1,
        "the lease must allow exactly one node to run the trigger"
    );
    let history = store.execution_history("daily.cleanup", 10).await.unwrap();
    assert_eq!(history.len(), 1, "exactly one execution row per trigger");
    assert_eq!(history[0].status, "completed");
    assert!(
        store.active_lock("daily.cleanup").await.unwrap().is_none(),
        "lease released after the run"
    );
}

// ── S5: catch-up at startup ────────────────────────────────────────

#[tokio::test]
async fn missed_trigger_within_window_is_caught_up() {
    let store = shared_store().await;
    let now = Utc::now();
    let missed = now - chrono::Duration::hours(2);
    store
        .upsert_state("daily.report", missed, missed, "node-x", "x")
        .await
        .unwrap();

    let mut config = fast_config();
    config.catch_up_window_secs = 24 * 3600;
    let scheduler = Scheduler::new(store.clone(), config);
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(counting_task("daily.report", "@daily", counter.clone()).global())
        .unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(5), || counter.load(Ordering::SeqCst) == 1).await,
        "missed daily trigger must run once"
    );
    scheduler.stop().await;

    let history = store.execution_history("daily.report", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].scheduled_at.timestamp(),
        missed.timestamp(),
        "execution row records the missed trigger time"
    );
}

#[tokio::test]
async fn stale_trigger_outside_window_is_skipped_and_advanced() {
    let store = shared_store().await;
    let now = Utc::now();
    let missed = now - chrono::Duration::hours(2);
    store
        .upsert_state("daily.report", missed, missed, "node-x", "x")
        .await
        .unwrap();

    let mut config = fast_config();
    config.catch_up_window_secs = 1800; // 30 minutes
    let scheduler = Scheduler::new(store.clone(), config);
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(counting_task("daily.report", "@daily", counter.clone()).global())
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    scheduler.stop().await;

    assert_eq!(counter.load(Ordering::SeqCst), 0, "stale trigger must not run");
    let state = store.get_state("daily.report").await.unwrap().unwrap();
    assert!(
        state.next_run.unwrap() > now,
        "shared next_run advanced to the next future trigger"
    );
    assert!(store
        .execution_history("daily.report", 10)
        .await
        .unwrap()
        .is_empty());
}

// ── run_now & admin ────────────────────────────────────────────────

#[tokio::test]
async fn run_now_executes_outside_cadence() {
    let scheduler = Scheduler::new(shared_store().await, fast_config());
    let counter = Arc::new(AtomicUsize::new(0));
    scheduler
        .register(counting_task("ondemand", "@daily", counter.clone()))
        .unwrap();

    assert!(
        scheduler.run_now("ondemand").is_err(),
        "run_now requires a running scheduler"
    );

    scheduler.start().await.unwrap();
    let admin = AdminAdapter::new(scheduler.clone());
    assert!(admin.is_running());
    admin.run_now("ondemand").unwrap();
    assert!(
        wait_until(Duration::from_secs(3), || counter.load(Ordering::SeqCst) == 1).await,
        "manual run must execute promptly"
    );
    assert!(admin.run_now("missing").is_err());

    let tasks = admin.get_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "ondemand");
    scheduler.stop().await;
}

// ── Shutdown ───────────────────────────────────────────────────────

#[tokio::test]
async fn stop_cancels_tasks_past_the_drain_deadline() {
    let mut config = fast_config();
    config.shutdown_timeout_secs = 1;
    let scheduler = Scheduler::new(shared_store().await, config);

    let hog = Task::new("hog", "hog", "@every 1h", move |token| {
        Box::pin(async move {
            tokio::select! {
                _ = token.cancelled() => Err(Error::Timeout("cancelled".into())),
                _ = tokio::time::sleep(Duration::from_secs(120)) => Ok(()),
            }
        })
    })
    .run_on_start();
    scheduler.register(hog).unwrap();

    scheduler.start().await.unwrap();
    assert!(
        wait_until(Duration::from_secs(3), || {
            scheduler.get_task("hog").unwrap().last_status == Some(TaskStatus::Running)
        })
        .await,
        "task must be in flight before stopping"
    );

    let started = std::time::Instant::now();
    scheduler.stop().await;
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "stop must cancel tasks after the drain deadline instead of hanging"
    );
    assert!(!scheduler.is_running());

    // Idempotent.
    scheduler.stop().await;
    scheduler.start().await.unwrap();
    scheduler.stop().await;
}
