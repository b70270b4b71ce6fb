//! Worker: drains a [`TaskQueue`] with timeouts, retries, and a bounded
//! result log.
//!
//! The main loop dequeues, runs each item on its own spawned task under the
//! configured per-task timeout, and appends successes to a bounded log
//! (oldest evicted at the cap). A failed or timed-out item enters the retry
//! handler: up to `max_retries` re-attempts with exponential backoff
//! (1 s, 2 s, 4 s, …). When retries are exhausted the item is routed to the
//! queue's failed buffer.
//!
//! `stop` is cooperative: the in-flight task finishes before the loop exits.

use crate::task_queue::{Task, TaskError, TaskQueue, TaskResult};
use crate::{Backoff, Clock, MonotonicClock, Sleeper, TokioSleeper};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Idle delay between polls of an empty queue.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Errors returned when configuring a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerConfigError {
    /// The result log must retain at least one entry.
    ZeroMaxResults,
    /// At least one retry is required.
    ZeroMaxRetries,
    /// The per-task timeout must be greater than zero.
    ZeroTimeout,
}

impl std::fmt::Display for WorkerConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerConfigError::ZeroMaxResults => write!(f, "max_results must be greater than zero"),
            WorkerConfigError::ZeroMaxRetries => write!(f, "max_retries must be greater than zero"),
            WorkerConfigError::ZeroTimeout => write!(f, "timeout must be greater than zero"),
        }
    }
}

impl std::error::Error for WorkerConfigError {}

/// A task attempt that outlived its deadline.
#[derive(Debug)]
struct AttemptTimedOut {
    limit: Duration,
}

impl std::fmt::Display for AttemptTimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task attempt exceeded its {:?} deadline", self.limit)
    }
}

impl std::error::Error for AttemptTimedOut {}

/// Executes queue items with a per-task timeout and retry, retaining a
/// bounded, oldest-first log of results.
pub struct Worker<T> {
    queue: Arc<Mutex<TaskQueue<T>>>,
    max_results: usize,
    max_retries: usize,
    timeout: Duration,
    results: Mutex<VecDeque<TaskResult<T>>>,
    running: AtomicBool,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("max_results", &self.max_results)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<T> Worker<T>
where
    T: Send + 'static,
{
    /// Create a worker over a shared queue with a default 30 s per-task
    /// timeout.
    pub fn new(
        queue: Arc<Mutex<TaskQueue<T>>>,
        max_results: usize,
        max_retries: usize,
    ) -> Result<Self, WorkerConfigError> {
        if max_results == 0 {
            return Err(WorkerConfigError::ZeroMaxResults);
        }
        if max_retries == 0 {
            return Err(WorkerConfigError::ZeroMaxRetries);
        }
        Ok(Self {
            queue,
            max_results,
            max_retries,
            timeout: Duration::from_secs(30),
            results: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Override the per-task timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, WorkerConfigError> {
        if timeout.is_zero() {
            return Err(WorkerConfigError::ZeroTimeout);
        }
        self.timeout = timeout;
        Ok(self)
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the sleeper used for the idle poll and retry backoff.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request a cooperative stop; the current task completes first.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Oldest retained result.
    pub fn last_result(&self) -> Option<TaskResult<T>>
    where
        T: Clone,
    {
        self.lock_results().front().cloned()
    }

    /// Copy of the result log, oldest first.
    pub fn results(&self) -> Vec<TaskResult<T>>
    where
        T: Clone,
    {
        self.lock_results().iter().cloned().collect()
    }

    /// Number of retained results.
    pub fn results_len(&self) -> usize {
        self.lock_results().len()
    }

    /// Drain the queue until [`stop`](Self::stop) is called.
    ///
    /// Each item runs on its own spawned task so a slow operation cannot
    /// wedge the loop past its deadline; an empty queue is polled roughly
    /// every 10 ms.
    pub async fn execute_tasks(&self) {
        self.running.store(true, Ordering::Release);
        tracing::info!(timeout_ms = self.timeout.as_millis() as u64, "worker started");

        while self.running.load(Ordering::Acquire) {
            let task = self.lock_queue().dequeue();
            let Some(mut task) = task else {
                self.sleeper.sleep(IDLE_POLL).await;
                continue;
            };

            match self.attempt(&mut task).await {
                Ok(value) => self.record(value),
                Err(cause) => {
                    tracing::warn!(error = %cause, "task failed, entering retry handler");
                    self.retry(task).await;
                }
            }
        }

        tracing::info!("worker stopped");
    }

    /// One attempt: spawn the task's future and bound it by the timeout.
    async fn attempt(&self, task: &mut Task<T>) -> Result<T, TaskError> {
        let mut handle = tokio::spawn(task.invoke());
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Box::new(join_error) as TaskError),
            Err(_) => {
                handle.abort();
                Err(Box::new(AttemptTimedOut { limit: self.timeout }) as TaskError)
            }
        }
    }

    /// Re-attempt with exponential backoff; on exhaustion the item moves to
    /// the queue's failed buffer.
    async fn retry(&self, mut task: Task<T>) {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        for attempt in 1..=self.max_retries {
            self.sleeper.sleep(backoff.delay(attempt)).await;
            match self.attempt(&mut task).await {
                Ok(value) => {
                    tracing::debug!(attempt, "task recovered on retry");
                    self.record(value);
                    return;
                }
                Err(cause) => {
                    tracing::debug!(attempt, error = %cause, "retry attempt failed");
                }
            }
        }
        tracing::warn!(retries = self.max_retries, "task exhausted retries, moved to failed buffer");
        self.lock_queue().enqueue_failure(task);
    }

    fn record(&self, value: T) {
        let mut results = self.lock_results();
        if results.len() >= self.max_results {
            results.pop_front();
        }
        results.push_back(TaskResult { completed_at: self.clock.wall_now_millis(), result: value });
    }

    fn lock_queue(&self) -> MutexGuard<'_, TaskQueue<T>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_results(&self) -> MutexGuard<'_, VecDeque<TaskResult<T>>> {
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
