//! Deferred task scheduling.
//!
//! ## Architecture
//! ```text
//! Importer ──push──> background ──(worker pool | inline)──> chained push ──> engine ──> ui
//!                         ^                                                    |
//!                         └──────────── Scheduler::drain (fixed passes) ───────┘
//! ```
//!
//! - [`Task`] - named deferred closure bound to one [`QueueKind`]
//! - [`TaskQueue`] - FIFO with sync (drain to fixpoint) and async dispatch
//! - [`Scheduler`] - owns the three queues and the drain protocol

mod pool;
mod queue;
mod scheduler;
mod task;

pub use queue::TaskQueue;
pub use scheduler::{DrainStats, Scheduler, SchedulerConfig, TaskingMode};
pub use task::{QueueKind, Task, TaskFn};
