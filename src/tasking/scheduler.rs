//! Three-queue scheduler and the drain-to-quiescence protocol.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::{Error, Result};
use super::pool::WorkerPool;
use super::queue::TaskQueue;
use super::task::{QueueKind, Task};

/// How the background queue is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskingMode {
    /// Background tasks run inline on the draining thread. Deterministic.
    #[default]
    Sync,
    /// Background tasks run on the worker pool, overlapping with the
    /// engine and ui queues.
    Async,
}

/// Scheduler policy.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: TaskingMode,
    /// Worker threads for async mode.
    pub worker_threads: usize,
    /// Upper bound on productive passes in one [`Scheduler::drain`].
    pub max_drain_passes: usize,
    /// Timeout of each wait on outstanding background work.
    pub wait_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: TaskingMode::Sync,
            worker_threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            max_drain_passes: 10_000,
            wait_timeout: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    /// Synchronous tasking with default limits.
    pub fn sync() -> Self {
        Self::default()
    }

    /// Asynchronous tasking with `worker_threads` background workers.
    pub fn asynchronous(worker_threads: usize) -> Self {
        Self {
            mode: TaskingMode::Async,
            worker_threads,
            ..Self::default()
        }
    }
}

/// Counters for one [`Scheduler::drain`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Passes that executed, dispatched or completed at least one task.
    pub passes: usize,
    /// Tasks executed synchronously plus tasks dispatched to the pool.
    pub executed: usize,
    /// Number of blocking waits on outstanding background work.
    pub waits: usize,
    /// Tasks that failed during this drain.
    pub failures: usize,
}

impl std::ops::AddAssign for DrainStats {
    fn add_assign(&mut self, rhs: Self) {
        self.passes += rhs.passes;
        self.executed += rhs.executed;
        self.waits += rhs.waits;
        self.failures += rhs.failures;
    }
}

/// Owns the background, engine-affine and ui-affine queues.
///
/// The engine and ui queues are bound to the thread that created the
/// scheduler. There is no cross-queue atomicity: ordered background to engine
/// handoff is done by pushing the engine task from inside the background
/// task.
pub struct Scheduler {
    config: SchedulerConfig,
    background: TaskQueue,
    engine: TaskQueue,
    ui: TaskQueue,
    pool: Option<Arc<WorkerPool>>,
}

impl Scheduler {
    /// Create the scheduler, binding its affine queues to the calling thread.
    pub fn new(config: SchedulerConfig) -> Result<Arc<Self>> {
        if config.max_drain_passes == 0 {
            return Err(Error::invalid("max_drain_passes must be positive"));
        }

        let pool = match config.mode {
            TaskingMode::Async => Some(Arc::new(WorkerPool::spawn(config.worker_threads)?)),
            TaskingMode::Sync => None,
        };
        let threads = pool.as_ref().map_or(0, |p| p.size());
        tracing::debug!(mode = ?config.mode, threads, "scheduler created");

        Ok(Arc::new(Self {
            background: TaskQueue::free(QueueKind::Background, pool.clone()),
            engine: TaskQueue::affine(QueueKind::Engine),
            ui: TaskQueue::affine(QueueKind::Ui),
            pool,
            config,
        }))
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn mode(&self) -> TaskingMode {
        self.config.mode
    }

    /// General-purpose off-thread queue.
    pub fn background(&self) -> &TaskQueue {
        &self.background
    }

    /// Queue for work that mutates live engine/scene state.
    pub fn engine(&self) -> &TaskQueue {
        &self.engine
    }

    /// Queue for interactive/reporting work.
    pub fn ui(&self) -> &TaskQueue {
        &self.ui
    }

    /// Queue by kind.
    pub fn queue(&self, kind: QueueKind) -> &TaskQueue {
        match kind {
            QueueKind::Background => &self.background,
            QueueKind::Engine => &self.engine,
            QueueKind::Ui => &self.ui,
        }
    }

    /// Route a task to the queue it is bound to.
    pub fn push(&self, task: Task) -> Result<()> {
        self.queue(task.queue()).push(task)
    }

    /// Total pending tasks across all queues.
    pub fn pending(&self) -> usize {
        self.background.len() + self.engine.len() + self.ui.len()
    }

    fn failures(&self) -> usize {
        self.background.failures() + self.engine.failures() + self.ui.failures()
    }

    /// Drain all three queues until a pass finds nothing to do.
    ///
    /// Each pass runs background work (inline or dispatched, per mode), then
    /// engine work, then ui work. In async mode a pass that has nothing new to
    /// dispatch waits on outstanding background tasks instead of terminating.
    /// Fails with [`Error::DrainBudgetExceeded`] when tasks keep re-enqueueing
    /// past `max_drain_passes`.
    pub fn drain(&self) -> Result<DrainStats> {
        let _span = tracing::info_span!("drain", mode = ?self.config.mode).entered();
        let failures_before = self.failures();
        let mut stats = DrainStats::default();

        loop {
            let mut executed = 0;
            let mut completed = 0;

            match self.config.mode {
                TaskingMode::Sync => {
                    executed += self.background.execute_all_pending_sync()?;
                }
                TaskingMode::Async => {
                    let dispatched = self.background.execute_all_pending_async()?;
                    executed += dispatched;
                    if dispatched == 0 && self.background.outstanding() > 0 {
                        stats.waits += 1;
                        completed = self.background.wait(self.config.wait_timeout);
                    }
                }
            }

            executed += self.engine.execute_all_pending_sync()?;
            executed += self.ui.execute_all_pending_sync()?;
            stats.executed += executed;

            if executed + completed == 0 {
                if self.background.outstanding() == 0 && self.pending() == 0 {
                    break;
                }
                // Background work still running; not a productive pass.
                continue;
            }

            stats.passes += 1;
            tracing::debug!(pass = stats.passes, executed, completed, "drain pass");
            if stats.passes > self.config.max_drain_passes {
                return Err(Error::DrainBudgetExceeded {
                    passes: stats.passes,
                });
            }
        }

        stats.failures = self.failures() - failures_before;
        tracing::debug!(?stats, "scheduler quiescent");
        Ok(stats)
    }

    /// Close all queues and stop the worker pool.
    pub fn shutdown(&self) {
        self.background.close();
        self.engine.close();
        self.ui.close();
        if let Some(pool) = &self.pool {
            pool.shutdown();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.config.mode)
            .field("background", &self.background)
            .field("engine", &self.engine)
            .field("ui", &self.ui)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn log_task(
        log: &Arc<Mutex<Vec<String>>>,
        entry: &str,
    ) -> impl FnOnce() -> Result<()> + Send + 'static {
        let log = Arc::clone(log);
        let entry = entry.to_string();
        move || {
            log.lock().push(entry);
            Ok(())
        }
    }

    #[test]
    fn test_empty_drain_terminates() {
        let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
        let stats = scheduler.drain().unwrap();
        assert_eq!(stats, DrainStats::default());
    }

    #[test]
    fn test_empty_drain_async_terminates() {
        let scheduler = Scheduler::new(SchedulerConfig::asynchronous(2)).unwrap();
        let stats = scheduler.drain().unwrap();
        assert_eq!(stats.executed, 0);
        assert_eq!(stats.waits, 0);
    }

    #[test]
    fn test_pass_order_sync() {
        let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.ui().submit("ui", log_task(&log, "ui")).unwrap();
        scheduler.engine().submit("engine", log_task(&log, "engine")).unwrap();
        scheduler.background().submit("bg", log_task(&log, "bg")).unwrap();

        let stats = scheduler.drain().unwrap();
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.passes, 1);
        assert_eq!(*log.lock(), vec!["bg", "engine", "ui"]);
    }

    #[test]
    fn test_chained_handoff_sync() {
        let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&scheduler);
        let l = Arc::clone(&log);
        scheduler
            .background()
            .submit("load", move || {
                l.lock().push("load".to_string());
                s.engine().submit("insert", log_task(&l, "insert"))
            })
            .unwrap();

        let stats = scheduler.drain().unwrap();
        assert_eq!(stats.executed, 2);
        assert_eq!(*log.lock(), vec!["load", "insert"]);
    }

    #[test]
    fn test_chained_handoff_async() {
        let scheduler = Scheduler::new(SchedulerConfig::asynchronous(2)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let main_thread = std::thread::current().id();

        for i in 0..4 {
            let s = Arc::clone(&scheduler);
            let l = Arc::clone(&log);
            scheduler
                .background()
                .submit(format!("load {i}"), move || {
                    std::thread::sleep(Duration::from_millis(5));
                    let l2 = Arc::clone(&l);
                    s.engine().submit(format!("insert {i}"), move || {
                        assert_eq!(std::thread::current().id(), main_thread);
                        l2.lock().push(format!("insert {i}"));
                        Ok(())
                    })
                })
                .unwrap();
        }

        let stats = scheduler.drain().unwrap();
        assert_eq!(stats.failures, 0);
        assert_eq!(scheduler.background().outstanding(), 0);
        let mut inserted = log.lock().clone();
        inserted.sort();
        assert_eq!(inserted, vec!["insert 0", "insert 1", "insert 2", "insert 3"]);
    }

    #[test]
    fn test_self_perpetuating_task_is_bounded() {
        // Background and ui tasks re-enqueue each other, so every pass finds work.
        fn ping(s: Arc<Scheduler>) -> Result<()> {
            let next = Arc::clone(&s);
            s.ui().submit("pong", move || pong(next))
        }
        fn pong(s: Arc<Scheduler>) -> Result<()> {
            let next = Arc::clone(&s);
            s.background().submit("ping", move || ping(next))
        }

        let config = SchedulerConfig {
            max_drain_passes: 16,
            ..SchedulerConfig::sync()
        };
        let scheduler = Scheduler::new(config).unwrap();
        let s = Arc::clone(&scheduler);
        scheduler.background().submit("ping", move || ping(s)).unwrap();

        let err = scheduler.drain().unwrap_err();
        assert!(matches!(err, Error::DrainBudgetExceeded { passes: 17 }));
        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_failures_reported() {
        let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
        scheduler.background().submit("bad", || Err(Error::other("bad file"))).unwrap();
        scheduler.engine().submit("good", || Ok(())).unwrap();
        let stats = scheduler.drain().unwrap();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_push_routes_by_kind() {
        let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
        scheduler.push(Task::engine("e", || Ok(()))).unwrap();
        scheduler.push(Task::ui("u", || Ok(()))).unwrap();
        assert_eq!(scheduler.engine().len(), 1);
        assert_eq!(scheduler.ui().len(), 1);
        assert_eq!(scheduler.pending(), 2);
    }

    #[test]
    fn test_shutdown_closes_queues() {
        let scheduler = Scheduler::new(SchedulerConfig::asynchronous(1)).unwrap();
        scheduler.shutdown();
        assert!(matches!(
            scheduler.background().submit("late", || Ok(())),
            Err(Error::QueueClosed(QueueKind::Background))
        ));
        assert!(matches!(
            scheduler.engine().submit("late", || Ok(())),
            Err(Error::QueueClosed(QueueKind::Engine))
        ));
    }
}
