//! Render engine collaborator interface.

use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::camera::CameraSample;
use crate::scene::SceneTree;
use crate::util::{Error, Result};

bitflags! {
    /// Extra layers written alongside the color image.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SaveFlags: u32 {
        const ALBEDO = 1;
        const DEPTH = 1 << 1;
        const NORMAL = 1 << 2;
        /// Write each layer to its own file instead of one multi-layer file.
        const LAYERS_SEPARATELY = 1 << 3;
    }
}

/// Frame buffer description handed to importers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameBufferInfo {
    pub width: u32,
    pub height: u32,
    /// `true` for float accumulation, `false` for 8-bit.
    pub float_format: bool,
}

impl Default for FrameBufferInfo {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            float_format: true,
        }
    }
}

/// Maximum number of accumulation frames per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationLimit {
    /// Stop after `n` frames. `Bounded(1)` disables refinement.
    Bounded(u32),
    /// Stop on variance only.
    Unbounded,
}

impl AccumulationLimit {
    /// Resolve the effective limit.
    ///
    /// An explicit limit wins (0 meaning unbounded); otherwise a variance
    /// threshold implies unbounded accumulation, and no threshold means one
    /// frame.
    pub fn resolve(explicit: Option<u32>, variance_threshold: f32) -> Self {
        match explicit {
            Some(0) => AccumulationLimit::Unbounded,
            Some(n) => AccumulationLimit::Bounded(n),
            None if variance_threshold > 0.0 => AccumulationLimit::Unbounded,
            None => AccumulationLimit::Bounded(1),
        }
    }

    /// Whether `accumulated` frames reach this limit.
    pub fn reached(self, accumulated: u32) -> bool {
        match self {
            AccumulationLimit::Bounded(n) => accumulated >= n,
            AccumulationLimit::Unbounded => false,
        }
    }
}

impl From<u32> for AccumulationLimit {
    fn from(n: u32) -> Self {
        if n == 0 {
            AccumulationLimit::Unbounded
        } else {
            AccumulationLimit::Bounded(n)
        }
    }
}

/// Convergence criteria of the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceSettings {
    pub variance_threshold: f32,
    pub limit: AccumulationLimit,
}

impl ConvergenceSettings {
    pub fn new(variance_threshold: f32, limit: AccumulationLimit) -> Result<Self> {
        if !variance_threshold.is_finite() || variance_threshold < 0.0 {
            return Err(Error::invalid(format!(
                "variance threshold {variance_threshold} must be >= 0"
            )));
        }
        if limit == AccumulationLimit::Unbounded && variance_threshold <= 0.0 {
            return Err(Error::invalid(
                "unbounded accumulation requires a positive variance threshold",
            ));
        }
        if limit == AccumulationLimit::Bounded(0) {
            return Err(Error::invalid("accumulation limit must be positive"));
        }
        Ok(Self { variance_threshold, limit })
    }
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            variance_threshold: 0.0,
            limit: AccumulationLimit::Bounded(1),
        }
    }
}

/// The progressive renderer the capture loop drives.
///
/// Called only from the thread that owns the engine queue.
pub trait RenderEngine {
    fn set_camera(&mut self, camera: &CameraSample);

    /// Rebuild live engine state from the scene.
    fn commit_scene(&mut self, scene: &SceneTree) -> Result<()>;

    /// Render one more accumulation frame.
    fn start_new_frame(&mut self) -> Result<()>;

    /// Estimated variance of the accumulated image.
    fn variance(&self) -> f32;

    fn current_accumulation(&self) -> u32;

    fn accumulation_limit_reached(&self) -> bool;

    fn reset_accumulation(&mut self);

    fn set_convergence(&mut self, settings: ConvergenceSettings);

    /// Request the in-flight frame to stop early.
    fn cancel_in_flight_frame(&mut self);

    /// Block until no frame is being rendered.
    fn wait_for_frame_stopped(&mut self);

    fn save_frame(&mut self, path: &Path, flags: SaveFlags) -> Result<()>;

    fn frame_buffer(&self) -> FrameBufferInfo;
}
