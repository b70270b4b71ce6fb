//! Multi-priority FIFO of pending work items.
//!
//! A [`TaskQueue`] holds re-invocable async operations across `P` priority
//! buffers (0 highest). `dequeue` is non-blocking: it scans the buffers in
//! priority order and returns the first available item, or `None`. A
//! separate `failed` buffer retains items whose retries were exhausted; the
//! worker never drains it; it exists for diagnosis and manual requeueing.

use futures::future::BoxFuture;
use std::collections::VecDeque;

/// Error type produced by queued operations; surfaced verbatim.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The future a queued operation produces per invocation.
pub type TaskFuture<T> = BoxFuture<'static, Result<T, TaskError>>;

/// A unit of queued work: an operation that can be invoked repeatedly, so
/// the worker's retry handler can re-run the same item.
pub struct Task<T> {
    op: Box<dyn FnMut() -> TaskFuture<T> + Send>,
}

impl<T> Task<T> {
    pub fn new<Op>(op: Op) -> Self
    where
        Op: FnMut() -> TaskFuture<T> + Send + 'static,
    {
        Self { op: Box::new(op) }
    }

    /// Start one attempt of the operation.
    pub fn invoke(&mut self) -> TaskFuture<T> {
        (self.op)()
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Task")
    }
}

/// A completed task's record: wall-clock completion time and its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult<T> {
    /// Epoch milliseconds at completion.
    pub completed_at: u64,
    pub result: T,
}

/// Errors from queue construction and enqueueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// At least one priority buffer is required.
    ZeroPriorities,
    /// The priority is outside `0..priorities`.
    PriorityOutOfRange { priority: usize, priorities: usize },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::ZeroPriorities => write!(f, "task queue requires at least one priority"),
            QueueError::PriorityOutOfRange { priority, priorities } => {
                write!(f, "priority {} out of range, queue has {} priorities", priority, priorities)
            }
        }
    }
}

impl std::error::Error for QueueError {}

/// `P` FIFO buffers indexed by priority, plus a failed-item buffer.
pub struct TaskQueue<T> {
    queues: Vec<VecDeque<Task<T>>>,
    failed: VecDeque<Task<T>>,
}

impl<T> std::fmt::Debug for TaskQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("priorities", &self.queues.len())
            .field("pending", &self.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

impl<T> TaskQueue<T> {
    /// Create a queue with `priorities` buffers (0 is the highest priority).
    pub fn new(priorities: usize) -> Result<Self, QueueError> {
        if priorities == 0 {
            return Err(QueueError::ZeroPriorities);
        }
        Ok(Self { queues: (0..priorities).map(|_| VecDeque::new()).collect(), failed: VecDeque::new() })
    }

    pub fn priorities(&self) -> usize {
        self.queues.len()
    }

    /// Pending items across all priority buffers (failed items excluded).
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a task to the given priority buffer.
    pub fn enqueue(&mut self, priority: usize, task: Task<T>) -> Result<(), QueueError> {
        let priorities = self.queues.len();
        let Some(queue) = self.queues.get_mut(priority) else {
            return Err(QueueError::PriorityOutOfRange { priority, priorities });
        };
        queue.push_back(task);
        Ok(())
    }

    /// Retain an item whose retries were exhausted.
    pub fn enqueue_failure(&mut self, task: Task<T>) {
        self.failed.push_back(task);
    }

    /// Number of retained failed items.
    pub fn failed_len(&self) -> usize {
        self.failed.len()
    }

    /// Remove and return the oldest failed item, for manual requeueing.
    pub fn take_failed(&mut self) -> Option<Task<T>> {
        self.failed.pop_front()
    }

    /// Return the first available item, scanning buffers in priority order.
    /// Non-blocking: `None` when every buffer is empty.
    pub fn dequeue(&mut self) -> Option<Task<T>> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn noop_task(tag: u32) -> Task<u32> {
        Task::new(move || async move { Ok(tag) }.boxed())
    }

    async fn run(task: &mut Task<u32>) -> u32 {
        task.invoke().await.unwrap()
    }

    #[test]
    fn rejects_zero_priorities() {
        assert_eq!(TaskQueue::<u32>::new(0).unwrap_err(), QueueError::ZeroPriorities);
    }

    #[test]
    fn rejects_out_of_range_priority() {
        let mut queue = TaskQueue::new(2).unwrap();
        assert_eq!(
            queue.enqueue(2, noop_task(0)).unwrap_err(),
            QueueError::PriorityOutOfRange { priority: 2, priorities: 2 }
        );
    }

    #[tokio::test]
    async fn dequeue_scans_priorities_in_order() {
        let mut queue = TaskQueue::new(3).unwrap();
        queue.enqueue(2, noop_task(20)).unwrap();
        queue.enqueue(0, noop_task(1)).unwrap();
        queue.enqueue(1, noop_task(10)).unwrap();
        queue.enqueue(0, noop_task(2)).unwrap();
        assert_eq!(queue.len(), 4);

        let mut order = Vec::new();
        while let Some(mut task) = queue.dequeue() {
            order.push(run(&mut task).await);
        }
        assert_eq!(order, vec![1, 2, 10, 20]);
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let mut queue = TaskQueue::<u32>::new(1).unwrap();
        assert!(queue.dequeue().is_none());
    }

    #[tokio::test]
    async fn failed_buffer_is_separate_from_dequeue() {
        let mut queue = TaskQueue::new(1).unwrap();
        queue.enqueue_failure(noop_task(7));
        assert_eq!(queue.failed_len(), 1);
        assert_eq!(queue.len(), 0);
        assert!(queue.dequeue().is_none());

        let mut task = queue.take_failed().unwrap();
        assert_eq!(run(&mut task).await, 7);
        assert_eq!(queue.failed_len(), 0);
    }

    #[tokio::test]
    async fn tasks_are_reinvocable() {
        let mut calls = 0u32;
        let mut task: Task<u32> = Task::new(move || {
            calls += 1;
            let n = calls;
            async move { Ok(n) }.boxed()
        });
        assert_eq!(task.invoke().await.unwrap(), 1);
        assert_eq!(task.invoke().await.unwrap(), 2);
    }
}
