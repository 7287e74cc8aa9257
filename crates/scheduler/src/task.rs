//! Task definitions and runtime state.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ms_domain::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// The future a task handler returns.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// The effectful part of a task. Receives a token that is cancelled on
/// scheduler shutdown; long handlers should poll it.
pub type TaskHandler = Arc<dyn Fn(CancellationToken) -> TaskFuture + Send + Sync>;

/// Where a task runs on each trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Runs on every node independently.
    Local,
    /// Runs on exactly one node per trigger, cluster-wide, guarded by the
    /// database lease.
    Global,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
    Skipped,
    Running,
    Retrying,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Definition
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A registered unit of recurring work.
#[derive(Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    /// `@every <n><unit>`, an alias, or a 5-field cron expression.
    pub schedule: String,
    pub kind: TaskKind,
    pub handler: TaskHandler,
    /// Whether operators may disable this task.
    pub skippable: bool,
    /// Fire immediately when the scheduler starts.
    pub run_on_start: bool,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Task {
    /// A local, skippable task with default retry policy.
    pub fn new<F>(id: &str, name: &str, schedule: &str, handler: F) -> Self
    where
        F: Fn(CancellationToken) -> TaskFuture + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            schedule: schedule.to_string(),
            kind: TaskKind::Local,
            handler: Arc::new(handler),
            skippable: true,
            run_on_start: false,
            max_retries: 3,
            retry_delay: Duration::from_secs(300),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Mark the task global: one run per trigger across the cluster.
    pub fn global(mut self) -> Self {
        self.kind = TaskKind::Global;
        self
    }

    pub fn not_skippable(mut self) -> Self {
        self.skippable = false;
        self
    }

    pub fn run_on_start(mut self) -> Self {
        self.run_on_start = true;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("schedule", &self.schedule)
            .field("kind", &self.kind)
            .field("skippable", &self.skippable)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime state & snapshots
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable per-task bookkeeping, owned by the scheduler.
#[derive(Debug, Clone)]
pub(crate) struct TaskRuntime {
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<TaskStatus>,
    pub run_count: u64,
    pub fail_count: u64,
    pub last_error: Option<String>,
    pub retry_count: u32,
    /// Pending retry trigger, independent of the cron cadence.
    pub retry_at: Option<DateTime<Utc>>,
    /// An execution is in flight on this node.
    pub in_flight: bool,
}

impl TaskRuntime {
    pub fn new(next_run: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            last_run: None,
            next_run: Some(next_run),
            last_status: None,
            run_count: 0,
            fail_count: 0,
            last_error: None,
            retry_count: 0,
            retry_at: None,
            in_flight: false,
        }
    }
}

/// Observable snapshot of a task: the definition minus its handler, plus
/// runtime counters. What the admin surface sees.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub schedule: String,
    pub kind: TaskKind,
    pub skippable: bool,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<TaskStatus>,
    pub run_count: u64,
    pub fail_count: u64,
    pub last_error: Option<String>,
    pub retry_count: u32,
}

/// Payload handed to the notify callback after a task exhausts its retry
/// budget.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task_id: String,
    pub name: String,
    pub error: String,
    /// Total attempts in the failed streak (initial run plus retries).
    pub attempts: u32,
    pub last_run: Option<DateTime<Utc>>,
    pub fail_count: u64,
}

/// Callback invoked out-of-band on terminal task failure.
pub type NotifyFn = Arc<dyn Fn(TaskFailure) + Send + Sync>;
