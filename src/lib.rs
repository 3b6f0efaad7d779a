//! # pixelheal
//!
//! Deferred task scheduling and automated camera-sweep capture for
//! regression testing a progressive ray tracer.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, bounding boxes
//! - [`tasking`] - Three-queue scheduler (background, engine, ui) with drain-to-quiescence
//! - [`scene`] - Scene graph trait, owned tree, registries
//! - [`import`] - Two-phase importers (raw volumes)
//! - [`camera`] - Fibonacci/random camera pose generator
//! - [`render`] - Render engine trait, convergence loop, output naming, CPU preview engine
//! - [`capture`] - Settings and the capture driver
//!
//! ## Example
//!
//! ```ignore
//! use pixelheal::prelude::*;
//!
//! let settings = CaptureSettings { num_frames: 8, ..Default::default() };
//! let engine = PreviewEngine::new(320, 240)?;
//! let mut driver = CaptureDriver::new(settings, engine)?;
//! let summary = driver.run(&["skull.raw".into()])?;
//! println!("saved {} images", summary.frames.len());
//! ```

pub mod util;
pub mod tasking;
pub mod scene;
pub mod import;
pub mod camera;
pub mod render;
pub mod capture;

// Re-export commonly used types
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{BBox3f, Error, Result, Vec3};
    pub use crate::tasking::{Scheduler, SchedulerConfig, Task, TaskingMode};
    pub use crate::scene::{SceneGraph, SceneTree};
    pub use crate::import::{importer_for, ImportContext, Importer};
    pub use crate::camera::{CameraGenerator, CameraSample, GeneratorStrategy};
    pub use crate::render::{PreviewEngine, RenderEngine, SaveFlags};
    pub use crate::capture::{CaptureDriver, CaptureSettings, CaptureSummary};
}
