//! Automated capture runs ("Pixel Heal Thyself").

mod driver;
mod settings;

pub use driver::{CaptureDriver, CaptureSummary};
pub use settings::CaptureSettings;
