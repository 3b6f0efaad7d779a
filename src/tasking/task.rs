//! Deferred units of work and the queues they are bound to.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crate::util::Result;

/// Logical queue a task must run on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// General-purpose off-thread work (file parsing, voxel decoding).
    Background,
    /// Work that mutates live render-engine or scene state.
    Engine,
    /// Work that belongs to the interactive/reporting thread.
    Ui,
}

impl QueueKind {
    /// Affine queues only ever run on the thread that owns the scheduler.
    #[inline]
    pub fn is_affine(self) -> bool {
        !matches!(self, QueueKind::Background)
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::Background => write!(f, "background"),
            QueueKind::Engine => write!(f, "engine"),
            QueueKind::Ui => write!(f, "ui"),
        }
    }
}

/// Boxed task body.
pub type TaskFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A named, deferred unit of work bound to one queue.
///
/// Immutable once built; consumed by the queue when it runs.
pub struct Task {
    name: String,
    queue: QueueKind,
    body: TaskFn,
}

impl Task {
    pub fn new<F>(queue: QueueKind, name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            queue,
            body: Box::new(body),
        }
    }

    /// Shorthand for a background task.
    pub fn background<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::new(QueueKind::Background, name, body)
    }

    /// Shorthand for an engine-affine task.
    pub fn engine<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::new(QueueKind::Engine, name, body)
    }

    /// Shorthand for a ui-affine task.
    pub fn ui<F>(name: impl Into<String>, body: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self::new(QueueKind::Ui, name, body)
    }

    /// Diagnostic label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue this task is bound to.
    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Run the body. Errors and panics are logged and reported as `false`.
    pub(crate) fn run(self) -> bool {
        let Task { name, queue, body } = self;
        tracing::trace!(task = %name, %queue, "run");

        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(task = %name, %queue, "Task failed: {}", e);
                false
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
                    .or_else(|| payload.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                tracing::error!(task = %name, %queue, "Task panicked: {}", msg);
                false
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Error;

    #[test]
    fn test_task_runs_body() {
        let (tx, rx) = std::sync::mpsc::channel();
        let task = Task::background("send", move || {
            tx.send(7u32).map_err(|e| Error::other(e.to_string()))
        });
        assert_eq!(task.name(), "send");
        assert_eq!(task.queue(), QueueKind::Background);
        assert!(task.run());
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn test_task_error_reported() {
        let task = Task::engine("fail", || Err(Error::other("boom")));
        assert!(!task.run());
    }

    #[test]
    fn test_task_panic_contained() {
        let task = Task::ui("panic", || panic!("task blew up"));
        assert!(!task.run());
    }

    #[test]
    fn test_queue_kind_affinity() {
        assert!(!QueueKind::Background.is_affine());
        assert!(QueueKind::Engine.is_affine());
        assert!(QueueKind::Ui.is_affine());
        assert_eq!(QueueKind::Ui.to_string(), "ui");
    }
}
