//! Render engine interface, convergence loop, output naming and the
//! headless preview engine.

mod convergence;
mod engine;
mod output;
mod preview;

pub use convergence::{render_to_convergence, CancelToken, ConvergenceReport, StopReason};
pub use engine::{AccumulationLimit, ConvergenceSettings, FrameBufferInfo, RenderEngine, SaveFlags};
pub use output::OutputNamer;
pub use preview::PreviewEngine;
