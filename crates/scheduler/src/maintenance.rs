//! Built-in housekeeping tasks.

use std::sync::Arc;
use std::time::Duration;

use crate::store::TaskStore;
use crate::task::Task;

/// A global daily task that prunes old execution history. Global so only
/// one node pays the delete cost per day.
pub fn execution_cleanup_task(store: Arc<TaskStore>, retention: Duration) -> Task {
    Task::new(
        "scheduler.executions.cleanup",
        "Execution history cleanup",
        "@daily",
        move |_token| {
            let store = store.clone();
            Box::pin(async move {
                let removed = store.cleanup_old_executions(retention).await?;
                if removed > 0 {
                    tracing::info!(removed, "pruned old execution rows");
                }
                Ok(())
            })
        },
    )
    .description("Deletes scheduler execution rows past the retention window")
    .global()
}
