//! Progressive render-to-convergence loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::util::Result;
use super::engine::RenderEngine;

/// Shared flag asking a running convergence loop to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Variance fell below the threshold.
    Converged,
    /// The accumulation limit was reached first.
    LimitReached,
    Cancelled,
}

/// Result of one [`render_to_convergence`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceReport {
    /// Accumulation frames rendered by this call.
    pub frames: u32,
    /// Variance after the last frame.
    pub variance: f32,
    pub reason: StopReason,
}

/// Render accumulation frames until the variance drops below `threshold`
/// or the engine reports its accumulation limit.
///
/// At least one frame is always started. Cancellation wins over convergence
/// and is detected two ways: through `cancel`, checked after every frame, and
/// through the engine discarding a frame (its accumulation count does not
/// advance). A variance that is not `>= threshold`, NaN included, counts as
/// converged.
pub fn render_to_convergence<E>(
    engine: &mut E,
    threshold: f32,
    cancel: &CancelToken,
) -> Result<ConvergenceReport>
where
    E: RenderEngine + ?Sized,
{
    let mut frames = 0;
    loop {
        let before = engine.current_accumulation();
        engine.start_new_frame()?;
        let accumulated = engine.current_accumulation();
        let discarded = accumulated == before;
        if !discarded {
            frames += 1;
        }
        let variance = engine.variance();
        tracing::debug!(frame = accumulated, variance, "accumulated");

        let reason = if discarded || cancel.is_cancelled() {
            Some(StopReason::Cancelled)
        } else if variance.is_nan() {
            tracing::warn!(frame = accumulated, "engine reported NaN variance, stopping");
            Some(StopReason::Converged)
        } else if variance < threshold {
            Some(StopReason::Converged)
        } else if engine.accumulation_limit_reached() {
            Some(StopReason::LimitReached)
        } else {
            None
        };

        if let Some(reason) = reason {
            return Ok(ConvergenceReport {
                frames,
                variance,
                reason,
            });
        }
    }
}
