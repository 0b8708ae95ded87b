//! Public handle to the worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::audio::AudioProcessor;
use crate::config::PoolConfig;
use crate::error::{DaemonError, Result};
use crate::types::{TaskId, TaskPayload, TaskReport, TaskState};

use super::coordinator::{Command, Coordinator, PoolEvent, PoolStats};
use super::queue::PendingTask;
use super::TaskProcessor;

/// Buffered events per subscriber before slow receivers start lagging.
const EVENT_CAPACITY: usize = 256;

/// A submitted task. The id is known immediately; the result arrives later.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<Result<TaskReport>>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for the task to reach a terminal state.
    pub async fn wait(self) -> Result<TaskReport> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(DaemonError::pool_shutdown()),
        }
    }
}

/// Bounded pool of worker threads with queueing, timeouts and retries.
///
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<PoolEvent>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Starts a pool that runs tasks with `processor`.
    pub fn new(config: PoolConfig, processor: impl TaskProcessor) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tracing::info!(
            max_workers = config.max_workers,
            timeout_ms = config.task_timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "Worker pool started"
        );

        let coordinator = Coordinator::new(config, Arc::new(processor), rx, events.clone());
        tokio::spawn(coordinator.run());

        Self {
            commands,
            events,
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts a pool backed by the built-in audio operations.
    pub fn with_audio_processor(config: PoolConfig) -> Self {
        Self::new(config, AudioProcessor)
    }

    /// Queues a task and returns its handle.
    ///
    /// After shutdown the handle resolves to `POOL_SHUTDOWN`.
    pub fn submit(&self, payload: TaskPayload) -> TaskHandle {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        tracing::debug!(task = %id, kind = %payload.kind(), "Submitting task");
        if self
            .commands
            .send(Command::Submit(PendingTask::new(id, payload, tx)))
            .is_err()
        {
            tracing::warn!(task = %id, "Task submitted after pool shutdown");
        }

        TaskHandle { id, rx }
    }

    /// Submits a task and waits for its result.
    pub async fn run(&self, payload: TaskPayload) -> Result<TaskReport> {
        self.submit(payload).wait().await
    }

    /// Submits all tasks up front and waits for every result in order.
    ///
    /// The first failure is returned and the remaining tasks are cancelled.
    pub async fn submit_batch(&self, payloads: Vec<TaskPayload>) -> Result<Vec<TaskReport>> {
        let handles: Vec<TaskHandle> = payloads.into_iter().map(|p| self.submit(p)).collect();
        let ids: Vec<TaskId> = handles.iter().map(TaskHandle::id).collect();

        let mut reports = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.wait().await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    for id in &ids[index + 1..] {
                        self.cancel(*id).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).ok()?;
        rx.await.ok()
    }

    /// Cancels a task that has not finished yet.
    ///
    /// A running task is rejected right away but its computation keeps going
    /// on an abandoned thread. Returns false for unknown or finished tasks.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        self.request(|reply| Command::Cancel { task_id, reply })
            .await
            .unwrap_or(false)
    }

    /// Rejects every queued task with `QUEUE_CLEARED`. Returns how many.
    pub async fn clear_queue(&self) -> usize {
        self.request(|reply| Command::ClearQueue { reply })
            .await
            .unwrap_or(0)
    }

    /// Returns pool counters and per-worker details.
    pub async fn stats(&self) -> Result<PoolStats> {
        self.request(|reply| Command::Stats { reply })
            .await
            .ok_or_else(DaemonError::pool_shutdown)
    }

    /// Returns the state of a task that has not finished yet.
    ///
    /// Finished and unknown tasks both return `None`; their outcome is
    /// delivered through the [`TaskHandle`].
    pub async fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.request(|reply| Command::State { task_id, reply })
            .await
            .flatten()
    }

    /// Subscribes to pool events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    /// Rejects all pending work with `POOL_SHUTDOWN` and stops the workers.
    pub async fn shutdown(&self) {
        if self
            .request(|reply| Command::Shutdown { reply })
            .await
            .is_some()
        {
            tracing::info!("Worker pool stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
