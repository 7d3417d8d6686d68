//! Delayed task scheduler: run a submitted task once its delay elapses,
//! support cancellation, and support orderly shutdown.
//!
//! Grounded on `joynr::DelayedScheduler` / `ThreadPoolDelayedScheduler` /
//! `SingleThreadedDelayedScheduler` (common/DelayedScheduler.cpp). The
//! original keeps a dedicated timer thread with one QTimer per runnable and
//! dispatches either to a thread pool (parallel) or runs inline (serial).
//! Tokio's timer wheel replaces the per-runnable QTimer; the two scheduler
//! "flavors" the spec calls out become two dispatch strategies over the same
//! timer mechanism.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A boxed, one-shot unit of scheduled work.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors a scheduler can report back to the caller of `schedule`/`cancel`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler has already been shut down.
    #[error("scheduler is shut down")]
    ShutDown,
    /// The handle did not correspond to a still-pending task.
    #[error("no pending task for handle {0}")]
    UnknownHandle(u64),
}

/// Opaque handle returned by `schedule`, usable to `cancel` a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

struct Pending {
    timer: JoinHandle<()>,
}

/// Shared bookkeeping common to both scheduler flavors: a monotonically
/// increasing handle counter, the set of pending (not-yet-fired) timers, and
/// a shutdown flag checked before arming new timers.
struct Core {
    next_handle: AtomicU64,
    pending: DashMap<u64, Pending>,
    shut_down: std::sync::atomic::AtomicBool,
}

impl Core {
    fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            pending: DashMap::new(),
            shut_down: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Single-threaded cooperative scheduler: tasks fire in deadline order and
/// run serially on one dedicated worker, matching
/// `SingleThreadedDelayedScheduler`'s guarantee that ordering equals deadline
/// ordering.
pub struct SingleThreadedDelayedScheduler {
    core: Arc<Core>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SingleThreadedDelayedScheduler {
    /// Creates a new single-threaded scheduler.
    pub fn new() -> Self {
        Self {
            core: Arc::new(Core::new()),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Schedules `task` to run after `delay`. Returns a handle usable with
    /// [`Self::cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] if the scheduler has already shut down.
    pub fn schedule(&self, task: Task, delay: Duration) -> Result<TaskHandle, SchedulerError> {
        if self.core.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        let handle_id = self.core.next();
        let core = Arc::clone(&self.core);
        let run_lock = Arc::clone(&self.run_lock);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if core.pending.remove(&handle_id).is_none() {
                return;
            }
            let _permit = run_lock.lock().await;
            task.await;
        });
        self.core.pending.insert(handle_id, Pending { timer });
        Ok(TaskHandle(handle_id))
    }

    /// Cancels a scheduled-but-not-yet-started task, preventing its execution.
    /// Cancelling an already-running task has no effect on the current run.
    pub fn cancel(&self, handle: TaskHandle) {
        if let Some((_, pending)) = self.core.pending.remove(&handle.0) {
            pending.timer.abort();
        }
    }

    /// Waits for any in-flight task to complete and drops everything queued.
    pub async fn shutdown(&self) {
        self.core.shut_down.store(true, Ordering::SeqCst);
        for entry in self.core.pending.iter() {
            entry.value().timer.abort();
        }
        self.core.pending.clear();
        // Waiting on the run lock ensures an in-flight task finishes before we return.
        let _ = self.run_lock.lock().await;
    }
}

impl Default for SingleThreadedDelayedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-pool scheduler: a timer per task posts into a bounded pool of
/// workers when its deadline elapses; tasks run in parallel with no
/// cross-task ordering guarantee, matching `ThreadPoolDelayedScheduler`.
pub struct ThreadPoolDelayedScheduler {
    core: Arc<Core>,
    permits: Arc<Semaphore>,
}

impl ThreadPoolDelayedScheduler {
    /// Creates a scheduler whose tasks run with at most `worker_count` concurrently.
    pub fn new(worker_count: usize) -> Self {
        Self {
            core: Arc::new(Core::new()),
            permits: Arc::new(Semaphore::new(worker_count.max(1))),
        }
    }

    /// Schedules `task` to run after `delay` on the worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::ShutDown`] if the scheduler has already shut down.
    pub fn schedule(&self, task: Task, delay: Duration) -> Result<TaskHandle, SchedulerError> {
        if self.core.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        let handle_id = self.core.next();
        let core = Arc::clone(&self.core);
        let permits = Arc::clone(&self.permits);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if core.pending.remove(&handle_id).is_none() {
                return;
            }
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            tokio::spawn(async move {
                task.await;
                drop(permit);
            });
        });
        self.core.pending.insert(handle_id, Pending { timer });
        Ok(TaskHandle(handle_id))
    }

    /// Cancels a scheduled-but-not-yet-started task.
    pub fn cancel(&self, handle: TaskHandle) {
        if let Some((_, pending)) = self.core.pending.remove(&handle.0) {
            pending.timer.abort();
        }
    }

    /// Drops all queued tasks and waits for in-flight tasks to drain from the pool.
    pub async fn shutdown(&self) {
        self.core.shut_down.store(true, Ordering::SeqCst);
        for entry in self.core.pending.iter() {
            entry.value().timer.abort();
        }
        self.core.pending.clear();
        // Acquiring every permit blocks until all in-flight tasks have released theirs.
        let total = self.permits.available_permits().max(1);
        if let Ok(_guard) = self.permits.acquire_many(total as u32).await {
            debug!("thread pool scheduler drained");
        } else {
            warn!("thread pool scheduler semaphore closed during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn single_threaded_fires_after_delay() {
        let scheduler = SingleThreadedDelayedScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        scheduler
            .schedule(
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                }),
                Duration::from_millis(20),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_before_delay_prevents_execution() {
        let scheduler = SingleThreadedDelayedScheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let handle = scheduler
            .schedule(
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                }),
                Duration::from_millis(50),
            )
            .unwrap();
        scheduler.cancel(handle);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn single_threaded_runs_tasks_in_deadline_order() {
        let scheduler = SingleThreadedDelayedScheduler::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let order_a = Arc::clone(&order);
        scheduler
            .schedule(
                Box::pin(async move { order_a.lock().await.push(1) }),
                Duration::from_millis(40),
            )
            .unwrap();
        let order_b = Arc::clone(&order);
        scheduler
            .schedule(
                Box::pin(async move { order_b.lock().await.push(0) }),
                Duration::from_millis(10),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*order.lock().await, vec![0, 1]);
    }

    #[tokio::test]
    async fn thread_pool_scheduler_runs_task() {
        let scheduler = ThreadPoolDelayedScheduler::new(2);
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        scheduler
            .schedule(
                Box::pin(async move {
                    flag.store(true, Ordering::SeqCst);
                }),
                Duration::from_millis(10),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn schedule_after_shutdown_is_rejected() {
        let scheduler = SingleThreadedDelayedScheduler::new();
        scheduler.shutdown().await;
        let result = scheduler.schedule(Box::pin(async {}), Duration::from_millis(10));
        assert!(matches!(result, Err(SchedulerError::ShutDown)));
    }
}
