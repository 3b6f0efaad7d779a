//! Camera poses for automated capture sweeps.

mod generator;

pub use generator::{CameraGenerator, CameraSample, GeneratorStrategy};
