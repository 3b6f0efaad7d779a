//! FIFO task queue with synchronous and asynchronous draining.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::util::{Error, Result};
use super::pool::WorkerPool;
use super::task::{QueueKind, Task};

/// Bookkeeping for asynchronously dispatched tasks.
#[derive(Default)]
struct CompletionState {
    /// Dispatched and not yet finished.
    in_flight: usize,
    /// Finished but not yet reported by `wait`.
    completed: usize,
}

#[derive(Default)]
struct Completion {
    state: Mutex<CompletionState>,
    cv: Condvar,
}

impl Completion {
    fn finish(&self) {
        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.completed += 1;
        self.cv.notify_all();
    }
}

/// Ordered collection of pending tasks for one logical queue.
///
/// Only the [`Scheduler`](super::Scheduler) constructs queues. Affine queues
/// (engine, ui) are bound to the scheduler's owning thread and can only be
/// drained synchronously there; the background queue may additionally
/// dispatch to the worker pool.
pub struct TaskQueue {
    kind: QueueKind,
    owner: Option<ThreadId>,
    pending: Mutex<VecDeque<Task>>,
    closed: AtomicBool,
    pool: Option<Arc<WorkerPool>>,
    completion: Arc<Completion>,
    failures: Arc<AtomicUsize>,
}

impl TaskQueue {
    /// Queue bound to the calling thread.
    pub(crate) fn affine(kind: QueueKind) -> Self {
        Self::build(kind, Some(thread::current().id()), None)
    }

    /// Free-threaded queue, optionally backed by a worker pool.
    pub(crate) fn free(kind: QueueKind, pool: Option<Arc<WorkerPool>>) -> Self {
        Self::build(kind, None, pool)
    }

    fn build(kind: QueueKind, owner: Option<ThreadId>, pool: Option<Arc<WorkerPool>>) -> Self {
        Self {
            kind,
            owner,
            pending: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            pool,
            completion: Arc::new(Completion::default()),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Which logical queue this is.
    #[inline]
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Append a task. Never blocks.
    pub fn push(&self, task: Task) -> Result<()> {
        if task.queue() != self.kind {
            return Err(Error::invalid(format!(
                "task '{}' targets the {} queue, pushed onto {}",
                task.name(),
                task.queue(),
                self.kind
            )));
        }
        if self.is_closed() {
            return Err(Error::QueueClosed(self.kind));
        }
        tracing::trace!(queue = %self.kind, task = task.name(), "push");
        self.pending.lock().push_back(task);
        Ok(())
    }

    /// Build a task for this queue and push it.
    pub fn submit<F>(&self, name: impl Into<String>, body: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.push(Task::new(self.kind, name, body))
    }

    /// Run every pending task on the calling thread, FIFO.
    ///
    /// Tasks pushed while this runs (including by the running tasks) are
    /// executed in the same call. Returns the number of tasks executed.
    pub fn execute_all_pending_sync(&self) -> Result<usize> {
        self.check_owner()?;

        let mut executed = 0;
        loop {
            // Lock released before the task runs so it may push follow-ups.
            let next = self.pending.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            if !task.run() {
                self.failures.fetch_add(1, Ordering::Relaxed);
            }
            executed += 1;
        }
        Ok(executed)
    }

    /// Hand every pending task to the worker pool without waiting.
    ///
    /// Returns the number of tasks dispatched.
    pub fn execute_all_pending_async(&self) -> Result<usize> {
        if self.owner.is_some() {
            return Err(Error::WrongThread(self.kind));
        }
        let Some(pool) = self.pool.as_ref() else {
            return Err(Error::invalid(format!(
                "queue '{}' has no worker pool (synchronous tasking)",
                self.kind
            )));
        };

        let mut tasks = std::mem::take(&mut *self.pending.lock()).into_iter();
        let mut dispatched = 0;
        while let Some(task) = tasks.next() {
            if !pool.is_running() {
                let rest: Vec<Task> = std::iter::once(task).chain(tasks).collect();
                tracing::warn!(
                    queue = %self.kind,
                    count = rest.len(),
                    "worker pool stopped, tasks kept pending"
                );
                self.requeue_front(rest);
                return Err(Error::QueueClosed(self.kind));
            }
            self.completion.state.lock().in_flight += 1;

            let name = task.name().to_string();
            let completion = Arc::clone(&self.completion);
            let failures = Arc::clone(&self.failures);
            let job = Box::new(move || {
                if !task.run() {
                    failures.fetch_add(1, Ordering::Relaxed);
                }
                completion.finish();
            });

            if let Err(e) = pool.execute(job) {
                self.completion.state.lock().in_flight -= 1;
                self.failures.fetch_add(1, Ordering::Relaxed);
                let rest: Vec<Task> = tasks.collect();
                tracing::warn!(
                    queue = %self.kind,
                    task = %name,
                    requeued = rest.len(),
                    "worker pool rejected task"
                );
                self.requeue_front(rest);
                return Err(e);
            }
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Put undispatched tasks back ahead of anything pushed meanwhile.
    fn requeue_front(&self, tasks: Vec<Task>) {
        let mut pending = self.pending.lock();
        for task in tasks.into_iter().rev() {
            pending.push_front(task);
        }
    }

    /// Block until at least one dispatched task finishes or `timeout` passes.
    ///
    /// Returns how many dispatched tasks finished since the previous call
    /// (0 on timeout, or immediately when nothing is outstanding).
    pub fn wait(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut state = self.completion.state.lock();
        while state.completed == 0 && state.in_flight > 0 {
            if self.completion.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        std::mem::take(&mut state.completed)
    }

    /// Number of pending (not yet started) tasks.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispatched tasks still running.
    pub fn in_flight(&self) -> usize {
        self.completion.state.lock().in_flight
    }

    /// Dispatched tasks that are running or finished but not yet reported
    /// by [`wait`](Self::wait).
    pub fn outstanding(&self) -> usize {
        let state = self.completion.state.lock();
        state.in_flight + state.completed
    }

    /// Total tasks that returned an error or panicked.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// Check if the queue was shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reject further pushes and drop whatever is still pending.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            tracing::warn!(
                queue = %self.kind,
                count = dropped.len(),
                "dropping pending tasks on shutdown"
            );
        }
    }

    fn check_owner(&self) -> Result<()> {
        match self.owner {
            Some(owner) if owner != thread::current().id() => Err(Error::WrongThread(self.kind)),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("kind", &self.kind)
            .field("pending", &self.len())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[test]
    fn test_sync_drain_is_fifo() {
        let queue = TaskQueue::affine(QueueKind::Engine);
        let order = Arc::new(PlMutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            queue
                .submit(format!("t{i}"), move || {
                    order.lock().push(i);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.execute_all_pending_sync().unwrap(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_sync_drain_runs_follow_ups() {
        let queue = Arc::new(TaskQueue::free(QueueKind::Background, None));
        let order = Arc::new(PlMutex::new(Vec::new()));

        for i in 1..=3 {
            let order = Arc::clone(&order);
            let q = Arc::clone(&queue);
            queue
                .submit(format!("task {i}"), move || {
                    order.lock().push(i);
                    if i == 2 {
                        let order = Arc::clone(&order);
                        q.submit("follow-up", move || {
                            order.lock().push(4);
                            Ok(())
                        })?;
                    }
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(queue.execute_all_pending_sync().unwrap(), 4);
        assert_eq!(*order.lock(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_failures_counted() {
        let queue = TaskQueue::affine(QueueKind::Ui);
        queue.submit("ok", || Ok(())).unwrap();
        queue.submit("bad", || Err(Error::other("nope"))).unwrap();
        assert_eq!(queue.execute_all_pending_sync().unwrap(), 2);
        assert_eq!(queue.failures(), 1);
    }

    #[test]
    fn test_push_wrong_kind() {
        let queue = TaskQueue::affine(QueueKind::Engine);
        let err = queue.push(Task::ui("misrouted", || Ok(()))).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_push_after_close() {
        let queue = TaskQueue::affine(QueueKind::Engine);
        queue.submit("dropped", || Ok(())).unwrap();
        queue.close();
        assert!(queue.is_empty());
        let err = queue.submit("late", || Ok(())).unwrap_err();
        assert!(matches!(err, Error::QueueClosed(QueueKind::Engine)));
    }

    #[test]
    fn test_affine_rejects_other_thread() {
        let queue = Arc::new(TaskQueue::affine(QueueKind::Engine));
        queue.submit("stay", || Ok(())).unwrap();

        let q = Arc::clone(&queue);
        let result = thread::spawn(move || q.execute_all_pending_sync()).join().unwrap();
        assert!(matches!(result, Err(Error::WrongThread(QueueKind::Engine))));
        assert_eq!(queue.len(), 1);

        assert!(matches!(
            queue.execute_all_pending_async(),
            Err(Error::WrongThread(QueueKind::Engine))
        ));
    }

    #[test]
    fn test_async_without_pool() {
        let queue = TaskQueue::free(QueueKind::Background, None);
        assert!(matches!(
            queue.execute_all_pending_async(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_async_dispatch_and_wait() {
        let pool = Arc::new(WorkerPool::spawn(2).unwrap());
        let queue = TaskQueue::free(QueueKind::Background, Some(pool));
        for i in 0..3 {
            queue.submit(format!("bg {i}"), || Ok(())).unwrap();
        }

        assert_eq!(queue.execute_all_pending_async().unwrap(), 3);
        assert!(queue.is_empty());

        let mut completed = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while completed < 3 && Instant::now() < deadline {
            completed += queue.wait(Duration::from_millis(100));
        }
        assert_eq!(completed, 3);
        assert_eq!(queue.outstanding(), 0);
    }

    #[test]
    fn test_async_keeps_tasks_when_pool_stopped() {
        let pool = Arc::new(WorkerPool::spawn(1).unwrap());
        let queue = TaskQueue::free(QueueKind::Background, Some(Arc::clone(&pool)));
        for i in 0..3 {
            queue.submit(format!("bg {i}"), || Ok(())).unwrap();
        }
        pool.shutdown();

        let err = queue.execute_all_pending_async().unwrap_err();
        assert!(matches!(err, Error::QueueClosed(QueueKind::Background)));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.in_flight(), 0);

        // Still runnable on the calling thread.
        assert_eq!(queue.execute_all_pending_sync().unwrap(), 3);
    }

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        let queue = TaskQueue::free(QueueKind::Background, None);
        let start = Instant::now();
        assert_eq!(queue.wait(Duration::from_secs(10)), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out() {
        let pool = Arc::new(WorkerPool::spawn(1).unwrap());
        let queue = TaskQueue::free(QueueKind::Background, Some(pool));
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        queue
            .submit("blocked", move || {
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();
        assert_eq!(queue.execute_all_pending_async().unwrap(), 1);

        assert_eq!(queue.wait(Duration::from_millis(20)), 0);
        assert_eq!(queue.in_flight(), 1);

        release_tx.send(()).unwrap();
        assert_eq!(queue.wait(Duration::from_secs(5)), 1);
    }
}
