//! FIFO queue of tasks waiting for a worker.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::Result;
use crate::types::{TaskId, TaskPayload, TaskReport};

/// A submitted task that has not reached a terminal state.
#[derive(Debug)]
pub(crate) struct PendingTask {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub retry_count: u32,
    reply: oneshot::Sender<Result<TaskReport>>,
}

impl PendingTask {
    pub fn new(
        id: TaskId,
        payload: TaskPayload,
        reply: oneshot::Sender<Result<TaskReport>>,
    ) -> Self {
        Self {
            id,
            payload,
            retry_count: 0,
            reply,
        }
    }

    /// Delivers the final result to the submitter. A submitter that stopped
    /// waiting is ignored.
    pub fn resolve(self, result: Result<TaskReport>) {
        let _ = self.reply.send(result);
    }
}

/// Tasks waiting for dispatch, in submission order.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: VecDeque<PendingTask>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a task and returns its position.
    pub fn push(&mut self, task: PendingTask) -> usize {
        self.tasks.push_back(task);
        self.tasks.len() - 1
    }

    /// Puts a task back at the head, for dispatches that never reached a worker.
    pub fn push_front(&mut self, task: PendingTask) {
        self.tasks.push_front(task);
    }

    pub fn pop(&mut self) -> Option<PendingTask> {
        self.tasks.pop_front()
    }

    /// Removes a task by id.
    pub fn remove(&mut self, id: TaskId) -> Option<PendingTask> {
        let index = self.position(id)?;
        self.tasks.remove(index)
    }

    /// Removes every task, oldest first.
    pub fn drain(&mut self) -> Vec<PendingTask> {
        self.tasks.drain(..).collect()
    }

    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
