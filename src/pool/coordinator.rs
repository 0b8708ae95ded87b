//! The pool coordinator.
//!
//! One Tokio task owns the queue, the in-flight table, the retry timers and
//! the workers. Everything else talks to it through [`Command`]s, so no pool
//! state is ever shared or locked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::config::PoolConfig;
use crate::error::{DaemonError, ErrorCode};
use crate::types::{TaskId, TaskReport, TaskState};

use super::queue::{PendingTask, TaskQueue};
use super::worker::{Worker, WorkerEvent, WorkerId, WorkerMessage, WorkerReply, WorkerStats};
use super::TaskProcessor;

/// Workers started eagerly; the rest are spawned on demand.
const INITIAL_WORKERS: usize = 2;

/// Lifecycle notifications published by the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum PoolEvent {
    Dispatched {
        task_id: TaskId,
        worker_id: WorkerId,
        attempt: u32,
    },
    Completed {
        task_id: TaskId,
        worker_id: WorkerId,
        retry_count: u32,
        processing_time_ms: u64,
    },
    Retrying {
        task_id: TaskId,
        retry_count: u32,
        delay_ms: u64,
        error: String,
    },
    Failed {
        task_id: TaskId,
        error: String,
    },
    TimedOut {
        task_id: TaskId,
        worker_id: WorkerId,
    },
    Cancelled {
        task_id: TaskId,
    },
    WorkerReplaced {
        worker_id: WorkerId,
        replacement: Option<WorkerId>,
        reason: String,
    },
}

impl PoolEvent {
    /// Returns the task this event is about, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            PoolEvent::Dispatched { task_id, .. }
            | PoolEvent::Completed { task_id, .. }
            | PoolEvent::Retrying { task_id, .. }
            | PoolEvent::Failed { task_id, .. }
            | PoolEvent::TimedOut { task_id, .. }
            | PoolEvent::Cancelled { task_id } => Some(*task_id),
            PoolEvent::WorkerReplaced { .. } => None,
        }
    }

    /// Returns the state the task entered with this event, if any.
    pub fn state(&self) -> Option<TaskState> {
        match self {
            PoolEvent::Dispatched { .. } => Some(TaskState::Dispatched),
            PoolEvent::Completed { .. } => Some(TaskState::Completed),
            PoolEvent::Retrying { .. } => Some(TaskState::Retrying),
            PoolEvent::Failed { .. } => Some(TaskState::Failed),
            PoolEvent::TimedOut { .. } => Some(TaskState::TimedOut),
            PoolEvent::Cancelled { .. } => Some(TaskState::Cancelled),
            PoolEvent::WorkerReplaced { .. } => None,
        }
    }
}

/// Pool counters and worker occupancy.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Tasks that timed out or ran out of retries.
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// Mean processing time over every worker reply, failures included.
    pub average_process_time_ms: f64,
    pub active_workers: usize,
    /// Retired threads still finishing a timed-out or cancelled task.
    pub abandoned_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queue_length: usize,
    /// Tasks that are queued, running or waiting to retry.
    pub active_tasks: usize,
    pub workers: Vec<WorkerStats>,
}

/// Requests handled by the coordinator.
pub(crate) enum Command {
    Submit(PendingTask),
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    ClearQueue {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    State {
        task_id: TaskId,
        reply: oneshot::Sender<Option<TaskState>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Debug)]
enum Timer {
    Timeout { task_id: TaskId, dispatch: u64 },
    RetryDue { task_id: TaskId },
}

struct InFlight {
    task: PendingTask,
    worker_id: WorkerId,
    /// Distinguishes this dispatch from earlier attempts of the same task.
    dispatch: u64,
    timer: AbortHandle,
}

struct BackingOff {
    task: PendingTask,
    timer: AbortHandle,
}

enum Failure {
    Reported(String),
    Crashed { worker_id: WorkerId, reason: String },
}

pub(crate) struct Coordinator {
    config: PoolConfig,
    processor: Arc<dyn TaskProcessor>,
    workers: Vec<Worker>,
    /// Worker threads alive, pool members and abandoned ones alike.
    live_threads: Arc<AtomicUsize>,
    next_worker: usize,
    queue: TaskQueue,
    in_flight: HashMap<TaskId, InFlight>,
    backing_off: HashMap<TaskId, BackingOff>,
    dispatch_seq: u64,

    commands: mpsc::UnboundedReceiver<Command>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    timer_tx: mpsc::UnboundedSender<Timer>,
    timer_rx: mpsc::UnboundedReceiver<Timer>,
    events: broadcast::Sender<PoolEvent>,

    total_tasks: u64,
    completed_tasks: u64,
    failed_tasks: u64,
    cancelled_tasks: u64,
    replies: u64,
    total_process_time: Duration,
}

impl Coordinator {
    pub fn new(
        config: PoolConfig,
        processor: Arc<dyn TaskProcessor>,
        commands: mpsc::UnboundedReceiver<Command>,
        events: broadcast::Sender<PoolEvent>,
    ) -> Self {
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();

        let mut coordinator = Self {
            config,
            processor,
            workers: Vec::new(),
            live_threads: Arc::new(AtomicUsize::new(0)),
            next_worker: 1,
            queue: TaskQueue::new(),
            in_flight: HashMap::new(),
            backing_off: HashMap::new(),
            dispatch_seq: 0,
            commands,
            worker_tx,
            worker_rx,
            timer_tx,
            timer_rx,
            events,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            replies: 0,
            total_process_time: Duration::ZERO,
        };

        for _ in 0..coordinator.max_workers().min(INITIAL_WORKERS) {
            coordinator.spawn_worker();
        }
        coordinator
    }

    fn max_workers(&self) -> usize {
        self.config.max_workers.max(1)
    }

    /// Runs until a shutdown command arrives or every pool handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        return;
                    }
                },
                Some(event) = self.worker_rx.recv() => self.handle_worker_event(event),
                Some(timer) = self.timer_rx.recv() => self.handle_timer(timer),
            }
            self.pump();
        }
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(task) => {
                self.total_tasks += 1;
                let position = self.queue.push(task);
                tracing::debug!(position, "Task queued");
            }
            Command::Cancel { task_id, reply } => {
                let _ = reply.send(self.cancel(task_id));
            }
            Command::ClearQueue { reply } => {
                let cleared = self.queue.drain();
                let count = cleared.len();
                for task in cleared {
                    let id = task.id;
                    task.resolve(Err(DaemonError::queue_cleared(id)));
                }
                if count > 0 {
                    tracing::info!(count, "Task queue cleared");
                }
                let _ = reply.send(count);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::State { task_id, reply } => {
                let _ = reply.send(self.state(task_id));
            }
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// State of a live task. Terminal tasks are forgotten, so they report
    /// `None` like unknown ids.
    fn state(&self, task_id: TaskId) -> Option<TaskState> {
        if self.in_flight.contains_key(&task_id) {
            Some(TaskState::Dispatched)
        } else if self.backing_off.contains_key(&task_id) {
            Some(TaskState::Retrying)
        } else if self.queue.position(task_id).is_some() {
            Some(TaskState::Queued)
        } else {
            None
        }
    }

    fn cancel(&mut self, task_id: TaskId) -> bool {
        let task = if let Some(task) = self.queue.remove(task_id) {
            task
        } else if let Some(waiting) = self.backing_off.remove(&task_id) {
            waiting.timer.abort();
            waiting.task
        } else if let Some(flight) = self.in_flight.remove(&task_id) {
            flight.timer.abort();
            // The computation cannot be interrupted; abandon the thread instead.
            self.retire_worker(flight.worker_id, "task cancelled");
            flight.task
        } else {
            return false;
        };

        tracing::debug!(task = %task_id, "Task cancelled");
        self.cancelled_tasks += 1;
        self.emit(PoolEvent::Cancelled { task_id });
        task.resolve(Err(DaemonError::cancelled(task_id)));
        true
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply(reply) => self.handle_reply(reply),
            WorkerEvent::Crashed {
                worker_id,
                task_id,
                reason,
            } => {
                if !self.workers.iter().any(|w| w.id == worker_id) {
                    tracing::debug!(worker = %worker_id, "Abandoned worker crashed");
                    return;
                }
                tracing::error!(worker = %worker_id, task = %task_id, %reason, "Worker crashed");
                self.retire_worker(worker_id, &format!("crashed: {}", reason));

                if let Some(flight) = self.in_flight.remove(&task_id) {
                    flight.timer.abort();
                    self.fail(flight.task, Failure::Crashed { worker_id, reason });
                }
            }
        }
    }

    fn handle_reply(&mut self, reply: WorkerReply) {
        let WorkerReply {
            worker_id,
            task_id,
            result,
            elapsed,
        } = reply;

        let Some(worker) = self.workers.iter_mut().find(|w| w.id == worker_id) else {
            tracing::debug!(worker = %worker_id, task = %task_id, "Discarding reply from abandoned worker");
            return;
        };
        if worker.current_task() != Some(task_id) {
            return;
        }
        worker.finish(elapsed);
        self.replies += 1;
        self.total_process_time += elapsed;

        let Some(flight) = self.in_flight.remove(&task_id) else {
            return;
        };
        flight.timer.abort();

        match result {
            Ok(output) => {
                let processing_time_ms = elapsed.as_millis() as u64;
                let retry_count = flight.task.retry_count;
                self.completed_tasks += 1;
                tracing::debug!(task = %task_id, worker = %worker_id, processing_time_ms, "Task completed");
                self.emit(PoolEvent::Completed {
                    task_id,
                    worker_id,
                    retry_count,
                    processing_time_ms,
                });
                flight.task.resolve(Ok(TaskReport {
                    task_id,
                    kind: output.kind(),
                    output,
                    retry_count,
                    processing_time_ms,
                }));
            }
            Err(error) => self.fail(flight.task, Failure::Reported(error)),
        }
    }

    /// Schedules a retry, or rejects the task once retries are exhausted.
    fn fail(&mut self, mut task: PendingTask, failure: Failure) {
        let reason = match &failure {
            Failure::Reported(error) => error.clone(),
            Failure::Crashed { reason, .. } => reason.clone(),
        };

        if task.retry_count < self.config.max_retries {
            task.retry_count += 1;
            let delay = self.config.retry_backoff * task.retry_count;
            tracing::warn!(
                task = %task.id,
                retry = task.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %reason,
                "Task failed, retrying"
            );
            self.emit(PoolEvent::Retrying {
                task_id: task.id,
                retry_count: task.retry_count,
                delay_ms: delay.as_millis() as u64,
                error: reason,
            });
            let timer = self.start_timer(delay, Timer::RetryDue { task_id: task.id });
            self.backing_off.insert(task.id, BackingOff { task, timer });
            return;
        }

        let error = match failure {
            Failure::Reported(error) => DaemonError::task_failed(task.id, error),
            Failure::Crashed { worker_id, .. } => DaemonError::worker_fault(worker_id),
        };
        tracing::warn!(task = %task.id, retries = task.retry_count, error = %error.message, "Task failed");
        self.failed_tasks += 1;
        self.emit(PoolEvent::Failed {
            task_id: task.id,
            error: error.message.clone(),
        });
        task.resolve(Err(error));
    }

    fn handle_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Timeout { task_id, dispatch } => {
                let current = self
                    .in_flight
                    .get(&task_id)
                    .is_some_and(|f| f.dispatch == dispatch);
                if !current {
                    return;
                }
                let Some(flight) = self.in_flight.remove(&task_id) else {
                    return;
                };

                let timeout_ms = self.config.task_timeout.as_millis() as u64;
                tracing::warn!(task = %task_id, worker = %flight.worker_id, timeout_ms, "Task timed out");
                self.failed_tasks += 1;
                self.emit(PoolEvent::TimedOut {
                    task_id,
                    worker_id: flight.worker_id,
                });
                self.retire_worker(flight.worker_id, "task timed out");
                flight
                    .task
                    .resolve(Err(DaemonError::task_timeout(task_id, timeout_ms)));
            }
            Timer::RetryDue { task_id } => {
                if let Some(waiting) = self.backing_off.remove(&task_id) {
                    tracing::debug!(task = %task_id, "Requeueing task for retry");
                    self.queue.push(waiting.task);
                }
            }
        }
    }

    fn start_timer(&self, delay: Duration, timer: Timer) -> AbortHandle {
        let tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(timer);
        })
        .abort_handle()
    }

    fn spawn_worker(&mut self) -> Option<WorkerId> {
        let id = WorkerId(self.next_worker);
        self.next_worker += 1;

        match Worker::spawn(
            id,
            Arc::clone(&self.processor),
            self.worker_tx.clone(),
            Arc::clone(&self.live_threads),
        ) {
            Ok(worker) => {
                self.workers.push(worker);
                Some(id)
            }
            Err(e) => {
                tracing::error!(worker = %id, error = %e, "Failed to spawn worker thread");
                None
            }
        }
    }

    /// Drops a worker and starts a fresh one in its place.
    ///
    /// The old thread is not joined. It exits after its current task, and
    /// anything it reports afterwards is ignored.
    fn retire_worker(&mut self, worker_id: WorkerId, reason: &str) {
        self.workers.retain(|w| w.id != worker_id);
        let replacement = self.spawn_worker();
        tracing::info!(worker = %worker_id, replacement = ?replacement, reason, "Worker replaced");

        let abandoned = self.abandoned_workers();
        if abandoned >= self.max_workers() {
            tracing::warn!(
                abandoned,
                max_workers = self.max_workers(),
                "Abandoned worker threads are still running; CPU use may exceed the pool size"
            );
        }
        self.emit(PoolEvent::WorkerReplaced {
            worker_id,
            replacement,
            reason: reason.to_string(),
        });
    }

    /// Hands queued tasks to idle workers, growing the pool when allowed.
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let index = match self.workers.iter().position(Worker::is_idle) {
                Some(index) => index,
                None if self.workers.len() < self.max_workers() => {
                    if self.spawn_worker().is_none() {
                        if self.workers.is_empty() {
                            self.reject_queue_without_workers();
                        }
                        break;
                    }
                    self.workers.len() - 1
                }
                None => break,
            };
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.dispatch(index, task);
        }
    }

    fn dispatch(&mut self, index: usize, task: PendingTask) {
        let message = WorkerMessage {
            task_id: task.id,
            kind: task.payload.kind(),
            data: task.payload.clone(),
        };

        let worker = &mut self.workers[index];
        let worker_id = worker.id;
        if worker.post(message).is_err() {
            self.queue.push_front(task);
            self.retire_worker(worker_id, "worker thread exited");
            return;
        }

        self.dispatch_seq += 1;
        let dispatch = self.dispatch_seq;
        let timer = self.start_timer(
            self.config.task_timeout,
            Timer::Timeout {
                task_id: task.id,
                dispatch,
            },
        );

        tracing::debug!(task = %task.id, worker = %worker_id, attempt = task.retry_count + 1, "Task dispatched");
        self.emit(PoolEvent::Dispatched {
            task_id: task.id,
            worker_id,
            attempt: task.retry_count + 1,
        });
        self.in_flight.insert(
            task.id,
            InFlight {
                task,
                worker_id,
                dispatch,
                timer,
            },
        );
    }

    fn reject_queue_without_workers(&mut self) {
        for task in self.queue.drain() {
            self.failed_tasks += 1;
            let id = task.id;
            task.resolve(Err(DaemonError::new(
                ErrorCode::WorkerFault,
                format!("No worker thread available for task {}", id),
            )));
        }
    }

    fn shutdown(&mut self) {
        tracing::info!(
            queued = self.queue.len(),
            running = self.in_flight.len(),
            "Shutting down worker pool"
        );

        for task in self.queue.drain() {
            task.resolve(Err(DaemonError::pool_shutdown()));
        }
        for (_, waiting) in self.backing_off.drain() {
            waiting.timer.abort();
            waiting.task.resolve(Err(DaemonError::pool_shutdown()));
        }
        for (_, flight) in self.in_flight.drain() {
            flight.timer.abort();
            flight.task.resolve(Err(DaemonError::pool_shutdown()));
        }
        // Closing the inboxes stops the threads once they are idle.
        self.workers.clear();
    }

    /// Threads retired from the pool that have not exited yet.
    fn abandoned_workers(&self) -> usize {
        self.live_threads
            .load(Ordering::SeqCst)
            .saturating_sub(self.workers.len())
    }

    fn stats(&self) -> PoolStats {
        let busy = self.workers.iter().filter(|w| !w.is_idle()).count();
        PoolStats {
            total_tasks: self.total_tasks,
            completed_tasks: self.completed_tasks,
            failed_tasks: self.failed_tasks,
            cancelled_tasks: self.cancelled_tasks,
            average_process_time_ms: if self.replies > 0 {
                self.total_process_time.as_secs_f64() * 1000.0 / self.replies as f64
            } else {
                0.0
            },
            active_workers: self.workers.len(),
            abandoned_workers: self.abandoned_workers(),
            idle_workers: self.workers.len() - busy,
            busy_workers: busy,
            queue_length: self.queue.len(),
            active_tasks: self.queue.len() + self.in_flight.len() + self.backing_off.len(),
            workers: self.workers.iter().map(Worker::stats).collect(),
        }
    }
}
