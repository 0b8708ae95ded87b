//! Worker threads.
//!
//! Each worker is an OS thread with its own inbox. It runs one task at a time
//! and reports back over the coordinator's event channel. Workers share no
//! mutable state with the coordinator.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::types::{TaskId, TaskKind, TaskOutput, TaskPayload};

use super::TaskProcessor;

/// Identifier of a worker thread, unique for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Message posted to a worker.
#[derive(Debug)]
pub(crate) struct WorkerMessage {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub data: TaskPayload,
}

/// Outcome of one task as reported by a worker.
#[derive(Debug)]
pub(crate) struct WorkerReply {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub result: std::result::Result<TaskOutput, String>,
    pub elapsed: Duration,
}

/// What a worker sends back to the coordinator.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Reply(WorkerReply),
    /// The processor panicked. The thread has exited.
    Crashed {
        worker_id: WorkerId,
        task_id: TaskId,
        reason: String,
    },
}

/// Per-worker details exposed in pool stats.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub id: WorkerId,
    pub busy: bool,
    pub current_task: Option<TaskId>,
    pub completed_tasks: u64,
    pub average_process_time_ms: f64,
    pub uptime_ms: u64,
}

/// Coordinator-side handle to a worker thread.
#[derive(Debug)]
pub(crate) struct Worker {
    pub id: WorkerId,
    inbox: Sender<WorkerMessage>,
    current_task: Option<TaskId>,
    completed: u64,
    total_time: Duration,
    started: Instant,
}

impl Worker {
    /// Spawns the worker thread.
    ///
    /// `live` counts running worker threads, including abandoned ones that
    /// are still finishing a task.
    pub fn spawn(
        id: WorkerId,
        processor: Arc<dyn TaskProcessor>,
        events: UnboundedSender<WorkerEvent>,
        live: Arc<AtomicUsize>,
    ) -> std::io::Result<Self> {
        let (inbox, rx) = mpsc::channel();
        let guard = LiveThread::enter(live);
        // The join handle is dropped on purpose: a worker abandoned mid-task
        // exits on its own once its inbox is closed.
        thread::Builder::new()
            .name(format!("mixdesk-{}", id))
            .spawn(move || {
                let _guard = guard;
                worker_loop(id, rx, processor, events)
            })?;

        tracing::debug!(worker = %id, "Worker started");
        Ok(Self {
            id,
            inbox,
            current_task: None,
            completed: 0,
            total_time: Duration::ZERO,
            started: Instant::now(),
        })
    }

    pub fn is_idle(&self) -> bool {
        self.current_task.is_none()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    /// Posts a task. Fails if the thread is gone, handing the message back.
    pub fn post(&mut self, message: WorkerMessage) -> std::result::Result<(), WorkerMessage> {
        let task_id = message.task_id;
        self.inbox.send(message).map_err(|e| e.0)?;
        self.current_task = Some(task_id);
        Ok(())
    }

    /// Marks the worker idle after a reply and records its timing.
    pub fn finish(&mut self, elapsed: Duration) {
        self.current_task = None;
        self.completed += 1;
        self.total_time += elapsed;
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            busy: !self.is_idle(),
            current_task: self.current_task,
            completed_tasks: self.completed,
            average_process_time_ms: if self.completed > 0 {
                self.total_time.as_secs_f64() * 1000.0 / self.completed as f64
            } else {
                0.0
            },
            uptime_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Holds one slot of the live-thread count until dropped.
struct LiveThread(Arc<AtomicUsize>);

impl LiveThread {
    fn enter(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for LiveThread {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn worker_loop(
    id: WorkerId,
    inbox: Receiver<WorkerMessage>,
    processor: Arc<dyn TaskProcessor>,
    events: UnboundedSender<WorkerEvent>,
) {
    while let Ok(message) = inbox.recv() {
        tracing::trace!(worker = %id, task = %message.task_id, kind = %message.kind, "Processing task");
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(message.data)));

        let event = match outcome {
            Ok(result) => WorkerEvent::Reply(WorkerReply {
                worker_id: id,
                task_id: message.task_id,
                result,
                elapsed: started.elapsed(),
            }),
            Err(panic) => {
                let _ = events.send(WorkerEvent::Crashed {
                    worker_id: id,
                    task_id: message.task_id,
                    reason: panic_message(panic.as_ref()),
                });
                return;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
    tracing::debug!(worker = %id, "Worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
