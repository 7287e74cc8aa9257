//! Read-mostly facade for the admin surface.
//!
//! Exposes task snapshots and the few mutations operators are allowed,
//! without handing out handlers or the scheduler internals.

use ms_domain::Result;

use crate::task::TaskInfo;
use crate::Scheduler;

#[derive(Clone)]
pub struct AdminAdapter {
    scheduler: Scheduler,
}

impl AdminAdapter {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn get_tasks(&self) -> Vec<TaskInfo> {
        self.scheduler.get_tasks()
    }

    pub fn get_task(&self, id: &str) -> Result<TaskInfo> {
        self.scheduler.get_task(id)
    }

    pub fn enable(&self, id: &str) -> Result<()> {
        self.scheduler.enable(id)
    }

    pub fn disable(&self, id: &str) -> Result<()> {
        self.scheduler.disable(id)
    }

    pub fn run_now(&self, id: &str) -> Result<()> {
        self.scheduler.run_now(id)
    }
}
