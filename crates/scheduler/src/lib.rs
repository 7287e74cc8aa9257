//! Distributed task scheduler.
//!
//! Evaluates cron/interval schedules on a 1-second tick, runs due tasks
//! with per-task timeouts and a retry budget, and coordinates "global"
//! tasks across nodes through a database lease so each trigger runs exactly
//! once cluster-wide. Missed triggers are caught up at startup within a
//! configurable window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use ms_domain::config::SchedulerConfig;
use ms_domain::{Error, Result};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub mod admin;
pub mod maintenance;
pub mod schedule;
pub mod store;
pub mod task;

pub use admin::AdminAdapter;
pub use schedule::Schedule;
pub use store::TaskStore;
pub use task::{NotifyFn, Task, TaskFailure, TaskInfo, TaskKind, TaskStatus};

use schedule::{parse_tz, parse_tz_strict};
use task::TaskRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Entry {
    def: Task,
    schedule: Schedule,
    runtime: TaskRuntime,
}

struct Lifecycle {
    /// Stops the tick loop immediately on `stop()`.
    tick_token: CancellationToken,
    /// Cancels running handlers once the drain deadline passes.
    work_token: CancellationToken,
    tracker: TaskTracker,
}

struct Inner {
    config: SchedulerConfig,
    store: Arc<TaskStore>,
    node_id: String,
    hostname: String,
    tasks: RwLock<HashMap<String, Entry>>,
    tz: RwLock<Tz>,
    notify: RwLock<Option<NotifyFn>>,
    running: AtomicBool,
    lifecycle: Mutex<Option<Lifecycle>>,
}

/// Handle to the scheduler. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(store: Arc<TaskStore>, config: SchedulerConfig) -> Self {
        let tz = parse_tz(&config.timezone);
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                node_id: uuid::Uuid::new_v4().to_string(),
                hostname,
                tasks: RwLock::new(HashMap::new()),
                tz: RwLock::new(tz),
                notify: RwLock::new(None),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
            }),
        }
    }

    /// This node's identity as written into lease and execution rows.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    // ── Registration & configuration ───────────────────────────────

    /// Register a task. Fails on an empty id, a duplicate id, or an
    /// unparseable schedule. Computes the initial `next_run` (now, when
    /// `run_on_start` is set).
    pub fn register(&self, task: Task) -> Result<()> {
        if task.id.trim().is_empty() {
            return Err(Error::TaskValidation("task id is empty".into()));
        }
        let schedule = Schedule::parse(&task.schedule)?;

        let now = Utc::now();
        let tz = *self.inner.tz.read();
        let next_run = if task.run_on_start {
            now
        } else {
            schedule.next_run(None, now, tz)?
        };

        let mut tasks = self.inner.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(Error::TaskValidation(format!(
                "task id already registered: {}",
                task.id
            )));
        }
        tracing::info!(
            task = %task.id,
            schedule = %task.schedule,
            kind = ?task.kind,
            next_run = %next_run,
            "registered task"
        );
        tasks.insert(
            task.id.clone(),
            Entry {
                runtime: TaskRuntime::new(next_run),
                schedule,
                def: task,
            },
        );
        Ok(())
    }

    /// Install the callback invoked after a task exhausts its retries.
    pub fn set_notify_fn(&self, notify: NotifyFn) {
        *self.inner.notify.write() = Some(notify);
    }

    /// Switch the zone all cron expressions are evaluated in. Rejects
    /// unknown IANA names and recomputes every pending `next_run`.
    pub fn set_timezone(&self, name: &str) -> Result<()> {
        let tz = parse_tz_strict(name)?;
        *self.inner.tz.write() = tz;

        let now = Utc::now();
        let mut tasks = self.inner.tasks.write();
        for entry in tasks.values_mut() {
            if let Ok(next) = entry.schedule.next_run(None, now, tz) {
                entry.runtime.next_run = Some(next);
            }
        }
        tracing::info!(timezone = %name, "scheduler timezone updated");
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start the tick loop. Idempotent. Before ticking, missed global
    /// triggers recorded in shared state are caught up (each still competes
    /// for its lease, so only one node runs a missed job).
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let lifecycle = Lifecycle {
            tick_token: CancellationToken::new(),
            work_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        let tick_token = lifecycle.tick_token.clone();
        let work_token = lifecycle.work_token.clone();
        let tracker = lifecycle.tracker.clone();
        *self.inner.lifecycle.lock() = Some(lifecycle);

        tracing::info!(node = %self.inner.node_id, "scheduler starting");

        self.catch_up(&tracker, &work_token).await;

        let inner = self.inner.clone();
        let loop_work_token = work_token.clone();
        let loop_tracker = tracker.clone();
        tracker.spawn(async move {
            let interval = inner.config.tick_interval();
            loop {
                tokio::select! {
                    _ = tick_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                tick(&inner, &loop_tracker, &loop_work_token);
            }
        });
        Ok(())
    }

    /// Stop the scheduler: halt the tick loop, wait up to the shutdown
    /// deadline for running tasks to drain, then cancel their tokens.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let Some(lifecycle) = self.inner.lifecycle.lock().take() else {
            return;
        };

        tracing::info!("scheduler stopping, draining running tasks");
        lifecycle.tick_token.cancel();
        lifecycle.tracker.close();

        let drain = self.inner.config.shutdown_timeout();
        if tokio::time::timeout(drain, lifecycle.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(deadline = ?drain, "drain deadline passed, cancelling running tasks");
            lifecycle.work_token.cancel();
            lifecycle.tracker.wait().await;
        }
        tracing::info!("scheduler stopped");
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Enable a task. Only skippable tasks may be toggled. The next run is
    /// recomputed from now so a long-disabled task does not fire
    /// immediately on a stale trigger.
    pub fn enable(&self, id: &str) -> Result<()> {
        self.toggle(id, true)
    }

    pub fn disable(&self, id: &str) -> Result<()> {
        self.toggle(id, false)
    }

    fn toggle(&self, id: &str, enabled: bool) -> Result<()> {
        let now = Utc::now();
        let tz = *self.inner.tz.read();
        let mut tasks = self.inner.tasks.write();
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.into()))?;
        if !entry.def.skippable {
            return Err(Error::TaskNotSkippable(id.into()));
        }
        entry.runtime.enabled = enabled;
        if enabled {
            if let Ok(next) = entry.schedule.next_run(None, now, tz) {
                entry.runtime.next_run = Some(next);
            }
        }
        tracing::info!(task = %id, enabled, "task toggled");
        Ok(())
    }

    /// Run a task immediately, outside its cadence. Still subject to the
    /// per-node overlap guard and, for global tasks, the cluster lease.
    pub fn run_now(&self, id: &str) -> Result<()> {
        if !self.is_running() {
            return Err(Error::TaskValidation("scheduler is not running".into()));
        }
        {
            let mut tasks = self.inner.tasks.write();
            let entry = tasks
                .get_mut(id)
                .ok_or_else(|| Error::TaskNotFound(id.into()))?;
            if entry.runtime.in_flight {
                return Err(Error::TaskValidation(format!(
                    "task is already running: {id}"
                )));
            }
            entry.runtime.in_flight = true;
        }

        let Some((tracker, work_token)) = ({
            let guard = self.inner.lifecycle.lock();
            guard
                .as_ref()
                .map(|l| (l.tracker.clone(), l.work_token.clone()))
        }) else {
            // Lost a race with stop().
            clear_in_flight(&self.inner, id);
            return Err(Error::TaskValidation("scheduler is not running".into()));
        };
        tracing::info!(task = %id, "manual run requested");
        let inner = self.inner.clone();
        let id = id.to_string();
        tracker.spawn(async move {
            execute(inner, id, Utc::now(), work_token).await;
        });
        Ok(())
    }

    /// Snapshot one task.
    pub fn get_task(&self, id: &str) -> Result<TaskInfo> {
        let tasks = self.inner.tasks.read();
        tasks
            .get(id)
            .map(snapshot)
            .ok_or_else(|| Error::TaskNotFound(id.into()))
    }

    /// Snapshot all tasks, ordered by id.
    pub fn get_tasks(&self) -> Vec<TaskInfo> {
        let tasks = self.inner.tasks.read();
        let mut infos: Vec<TaskInfo> = tasks.values().map(snapshot).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// The most recent execution rows for a task, newest first.
    pub async fn get_execution_history(
        &self,
        id: &str,
        limit: u32,
    ) -> Result<Vec<store::TaskExecutionRow>> {
        if !self.inner.tasks.read().contains_key(id) {
            return Err(Error::TaskNotFound(id.into()));
        }
        self.inner.store.execution_history(id, limit).await
    }

    /// Delete execution rows older than `retention`.
    pub async fn cleanup_old_executions(&self, retention: std::time::Duration) -> Result<u64> {
        self.inner.store.cleanup_old_executions(retention).await
    }

    // ── Catch-up ───────────────────────────────────────────────────

    /// Submit missed global triggers through the normal execution path.
    /// Triggers staler than the catch-up window are skipped and their
    /// shared `next_run` advanced instead.
    async fn catch_up(&self, tracker: &TaskTracker, work_token: &CancellationToken) {
        let now = Utc::now();
        let overdue = match self.inner.store.overdue_states(now).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read shared state for catch-up");
                return;
            }
        };

        let window = chrono::Duration::from_std(self.inner.config.catch_up_window())
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let tz = *self.inner.tz.read();

        for row in overdue {
            let missed_at = match row.next_run {
                Some(t) => t,
                None => continue,
            };

            // Only registered, enabled global tasks participate.
            let (eligible, future_next) = {
                let mut tasks = self.inner.tasks.write();
                match tasks.get_mut(&row.task_name) {
                    Some(entry)
                        if entry.def.kind == TaskKind::Global && entry.runtime.enabled =>
                    {
                        if now - missed_at <= window && !entry.runtime.in_flight {
                            entry.runtime.in_flight = true;
                            (true, None)
                        } else {
                            (false, entry.schedule.next_run(None, now, tz).ok())
                        }
                    }
                    _ => continue,
                }
            };

            if eligible {
                tracing::info!(task = %row.task_name, missed_at = %missed_at, "catching up missed trigger");
                let inner = self.inner.clone();
                let id = row.task_name.clone();
                let token = work_token.clone();
                tracker.spawn(async move {
                    execute(inner, id, missed_at, token).await;
                });
            } else if let Some(next) = future_next {
                tracing::warn!(
                    task = %row.task_name,
                    missed_at = %missed_at,
                    "missed trigger is outside the catch-up window, advancing"
                );
                if let Err(e) = self.inner.store.advance_state(&row.task_name, next).await {
                    tracing::warn!(task = %row.task_name, error = %e, "failed to advance shared state");
                }
            }
        }
    }
}

fn snapshot(entry: &Entry) -> TaskInfo {
    TaskInfo {
        id: entry.def.id.clone(),
        name: entry.def.name.clone(),
        description: entry.def.description.clone(),
        schedule: entry.def.schedule.clone(),
        kind: entry.def.kind,
        skippable: entry.def.skippable,
        enabled: entry.runtime.enabled,
        last_run: entry.runtime.last_run,
        next_run: entry.runtime.next_run,
        last_status: entry.runtime.last_status,
        run_count: entry.runtime.run_count,
        fail_count: entry.runtime.fail_count,
        last_error: entry.runtime.last_error.clone(),
        retry_count: entry.runtime.retry_count,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tick
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One pass of the coordinator loop: find due tasks under the read lock,
/// advance their cadence under the write lock, and spawn executions.
fn tick(inner: &Arc<Inner>, tracker: &TaskTracker, work_token: &CancellationToken) {
    let now = Utc::now();
    let tz = *inner.tz.read();

    let due: Vec<String> = {
        let tasks = inner.tasks.read();
        tasks
            .values()
            .filter(|e| {
                e.runtime.enabled
                    && !e.runtime.in_flight
                    && (e.runtime.next_run.is_some_and(|t| now >= t)
                        || e.runtime.retry_at.is_some_and(|t| now >= t))
            })
            .map(|e| e.def.id.clone())
            .collect()
    };

    for id in due {
        let scheduled_at = {
            let mut tasks = inner.tasks.write();
            let Some(entry) = tasks.get_mut(&id) else { continue };
            // Re-check under the write lock; another tick may have raced.
            if !entry.runtime.enabled || entry.runtime.in_flight {
                continue;
            }

            let cadence_due = entry.runtime.next_run.is_some_and(|t| now >= t);
            let retry_due = entry.runtime.retry_at.is_some_and(|t| now >= t);
            if !cadence_due && !retry_due {
                continue;
            }

            let scheduled_at = if cadence_due {
                let previous = entry.runtime.next_run;
                entry.runtime.last_run = Some(now);
                match entry.schedule.next_run(previous, now, tz) {
                    Ok(next) => entry.runtime.next_run = Some(next),
                    Err(e) => {
                        tracing::warn!(task = %id, error = %e, "failed to compute next run");
                        entry.runtime.next_run = None;
                    }
                }
                previous.unwrap_or(now)
            } else {
                entry.runtime.retry_at.take().unwrap_or(now)
            };

            entry.runtime.in_flight = true;
            scheduled_at
        };

        let inner = inner.clone();
        let token = work_token.clone();
        tracker.spawn(async move {
            execute(inner, id, scheduled_at, token).await;
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn execute(
    inner: Arc<Inner>,
    id: String,
    scheduled_at: DateTime<Utc>,
    work_token: CancellationToken,
) {
    let (handler, kind, max_retries, retry_delay) = {
        let tasks = inner.tasks.read();
        let Some(entry) = tasks.get(&id) else { return };
        (
            entry.def.handler.clone(),
            entry.def.kind,
            entry.def.max_retries,
            entry.def.retry_delay,
        )
    };

    // Global tasks bracket the run with the store: lease, execution row,
    // shared state.
    let mut execution_id = None;
    if kind == TaskKind::Global {
        match inner
            .store
            .acquire_lease(
                &id,
                &inner.node_id,
                &inner.hostname,
                inner.config.lock_ttl(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Another node owns this trigger. Not a state change for
                // this node and no execution row is written.
                tracing::debug!(task = %id, "lease held elsewhere, skipping");
                clear_in_flight(&inner, &id);
                return;
            }
            Err(e) => {
                tracing::warn!(task = %id, error = %e, "lease acquisition failed, skipping");
                clear_in_flight(&inner, &id);
                return;
            }
        }

        match inner
            .store
            .record_start(&id, &inner.node_id, &inner.hostname, scheduled_at)
            .await
        {
            Ok(row_id) => execution_id = Some(row_id),
            Err(e) => tracing::warn!(task = %id, error = %e, "failed to record execution start"),
        }
    }

    {
        let mut tasks = inner.tasks.write();
        if let Some(entry) = tasks.get_mut(&id) {
            entry.runtime.last_status = Some(TaskStatus::Running);
        }
    }

    tracing::debug!(task = %id, "task starting");
    let run_token = work_token.child_token();
    let timeout = inner.config.task_timeout();
    let outcome: Result<()> = tokio::select! {
        result = tokio::time::timeout(timeout, handler(run_token.clone())) => match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::Timeout(format!("task exceeded {timeout:?}"))),
        },
        _ = run_token.cancelled() => Err(Error::Timeout("task cancelled during shutdown".into())),
    };
    let succeeded = outcome.is_ok();
    let error_text = outcome.as_ref().err().map(ToString::to_string);

    if let Some(row_id) = execution_id {
        if let Err(e) = inner
            .store
            .record_completion(row_id, succeeded, error_text.as_deref())
            .await
        {
            tracing::warn!(task = %id, error = %e, "failed to record execution completion");
        }
    }

    // Local state machine: success resets the retry streak; failures retry
    // until the budget is spent, then notify out-of-band.
    let now = Utc::now();
    let mut notification = None;
    {
        let mut tasks = inner.tasks.write();
        if let Some(entry) = tasks.get_mut(&id) {
            let rt = &mut entry.runtime;
            rt.in_flight = false;
            if succeeded {
                rt.last_status = Some(TaskStatus::Success);
                rt.retry_count = 0;
                rt.retry_at = None;
                rt.last_error = None;
                rt.run_count += 1;
            } else {
                let error = error_text.clone().unwrap_or_else(|| "unknown error".into());
                rt.retry_count += 1;
                rt.last_error = Some(error.clone());
                if rt.retry_count >= max_retries.max(1) {
                    let attempts = rt.retry_count;
                    rt.last_status = Some(TaskStatus::Failed);
                    rt.fail_count += 1;
                    rt.retry_count = 0;
                    rt.retry_at = None;
                    notification = Some(TaskFailure {
                        task_id: id.clone(),
                        name: entry.def.name.clone(),
                        error,
                        attempts,
                        last_run: rt.last_run,
                        fail_count: rt.fail_count,
                    });
                } else {
                    rt.last_status = Some(TaskStatus::Retrying);
                    rt.retry_at = Some(
                        now + chrono::Duration::from_std(retry_delay)
                            .unwrap_or_else(|_| chrono::Duration::seconds(300)),
                    );
                    tracing::warn!(
                        task = %id,
                        attempt = rt.retry_count,
                        max = max_retries,
                        error = %error,
                        "task failed, retry scheduled"
                    );
                }
            }
        }
    }

    if let Some(failure) = notification {
        tracing::error!(
            task = %id,
            attempts = failure.attempts,
            error = %failure.error,
            "task failed terminally"
        );
        let notify = inner.notify.read().clone();
        if let Some(notify) = notify {
            notify(failure);
        }
    } else if succeeded {
        tracing::debug!(task = %id, "task succeeded");
    }

    if kind == TaskKind::Global {
        let shared_next = {
            let tasks = inner.tasks.read();
            tasks.get(&id).and_then(|e| e.runtime.next_run)
        };
        if let Some(next) = shared_next {
            if let Err(e) = inner
                .store
                .upsert_state(&id, now, next, &inner.node_id, &inner.hostname)
                .await
            {
                tracing::warn!(task = %id, error = %e, "failed to update shared state");
            }
        }
        // Lease release failures are logged only; expiry cleans them up.
        if let Err(e) = inner.store.release_lease(&id, &inner.node_id).await {
            tracing::warn!(task = %id, error = %e, "failed to release lease");
        }
    }
}

fn clear_in_flight(inner: &Arc<Inner>, id: &str) {
    let mut tasks = inner.tasks.write();
    if let Some(entry) = tasks.get_mut(id) {
        entry.runtime.in_flight = false;
    }
}
