//! Worker pool for audio tasks.
//!
//! Tasks run on dedicated OS threads so CPU-heavy audio work never blocks the
//! async runtime. A single coordinator task owns all bookkeeping (queue,
//! in-flight tasks, timers, retries) and talks to the workers over channels.

mod coordinator;
pub mod manager;
mod queue;
mod worker;

// Re-export commonly used types
pub use coordinator::{PoolEvent, PoolStats};
pub use manager::{TaskHandle, WorkerPool};
pub use worker::{WorkerId, WorkerStats};

use crate::types::{TaskOutput, TaskPayload};

/// Executes one task payload on a worker thread.
///
/// Returning `Err` reports a task-level failure that the pool may retry.
/// A panic is treated as a worker crash: the worker is replaced and the task
/// goes through the same retry path.
pub trait TaskProcessor: Send + Sync + 'static {
    fn process(&self, payload: TaskPayload) -> Result<TaskOutput, String>;
}

impl<F> TaskProcessor for F
where
    F: Fn(TaskPayload) -> Result<TaskOutput, String> + Send + Sync + 'static,
{
    fn process(&self, payload: TaskPayload) -> Result<TaskOutput, String> {
        self(payload)
    }
}
