//! Capture run settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::camera::GeneratorStrategy;
use crate::import::VolumeParams;
use crate::render::{AccumulationLimit, ConvergenceSettings, SaveFlags};
use crate::scene::InstanceConfiguration;
use crate::tasking::{SchedulerConfig, TaskingMode};
use crate::util::{Error, Result};

/// Everything a capture run is configured by. Loadable from JSON; missing
/// fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    // Output
    pub image_name: String,
    pub image_format: String,
    pub force_overwrite: bool,
    pub save_albedo: bool,
    pub save_depth: bool,
    pub save_normal: bool,
    pub save_layers_separately: bool,

    // Frame
    pub resolution: [u32; 2],
    pub variance_threshold: f32,
    /// Explicit accumulation limit; 0 means unbounded.
    pub accum_limit: Option<u32>,

    // Camera sweep
    pub camera_generator: GeneratorStrategy,
    pub flip_yz: bool,
    pub num_frames: u32,
    pub jitter: f32,
    pub zoom: f32,
    pub seed: Option<u64>,

    // Tasking
    pub async_tasking: bool,
    /// Background workers; 0 picks the available parallelism.
    pub worker_threads: usize,
    pub max_drain_passes: usize,
    pub wait_timeout_ms: u64,

    // Scene
    pub scene_config: Option<InstanceConfiguration>,
    pub instance_config: InstanceConfiguration,
    pub volume: VolumeParams,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            image_name: "pht".into(),
            image_format: "png".into(),
            force_overwrite: false,
            save_albedo: false,
            save_depth: false,
            save_normal: false,
            save_layers_separately: false,
            resolution: [1024, 768],
            variance_threshold: 0.0,
            accum_limit: None,
            camera_generator: GeneratorStrategy::Fibonacci,
            flip_yz: false,
            num_frames: 32,
            jitter: 0.0,
            zoom: 0.0,
            seed: None,
            async_tasking: false,
            worker_threads: 0,
            max_drain_passes: 10_000,
            wait_timeout_ms: 100,
            scene_config: None,
            instance_config: InstanceConfiguration::Dynamic,
            volume: VolumeParams::default(),
        }
    }
}

impl CaptureSettings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::file_open(path, e))?;
        let settings: Self = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded capture settings");
        Ok(settings)
    }

    /// Write settings as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        if self.image_name.is_empty() {
            return Err(Error::invalid("image name must not be empty"));
        }
        if self.image_format.is_empty() || self.image_format.contains('.') {
            return Err(Error::invalid(format!("invalid image format '{}'", self.image_format)));
        }
        if self.resolution[0] == 0 || self.resolution[1] == 0 {
            return Err(Error::invalid(format!(
                "resolution {}x{} must be non-zero",
                self.resolution[0], self.resolution[1]
            )));
        }
        if self.num_frames == 0 {
            return Err(Error::invalid("num_frames must be positive"));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(Error::invalid(format!("jitter {} must be finite and >= 0", self.jitter)));
        }
        if !self.zoom.is_finite() {
            return Err(Error::invalid(format!("zoom {} must be finite", self.zoom)));
        }
        if self.max_drain_passes == 0 {
            return Err(Error::invalid("max_drain_passes must be positive"));
        }
        self.convergence()?;
        Ok(())
    }

    pub fn accumulation_limit(&self) -> AccumulationLimit {
        AccumulationLimit::resolve(self.accum_limit, self.variance_threshold)
    }

    pub fn convergence(&self) -> Result<ConvergenceSettings> {
        ConvergenceSettings::new(self.variance_threshold, self.accumulation_limit())
    }

    pub fn save_flags(&self) -> SaveFlags {
        let mut flags = SaveFlags::empty();
        flags.set(SaveFlags::ALBEDO, self.save_albedo);
        flags.set(SaveFlags::DEPTH, self.save_depth);
        flags.set(SaveFlags::NORMAL, self.save_normal);
        flags.set(SaveFlags::LAYERS_SEPARATELY, self.save_layers_separately);
        flags
    }

    pub fn tasking_mode(&self) -> TaskingMode {
        if self.async_tasking {
            TaskingMode::Async
        } else {
            TaskingMode::Sync
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            mode: self.tasking_mode(),
            worker_threads: if self.worker_threads == 0 {
                defaults.worker_threads
            } else {
                self.worker_threads
            },
            max_drain_passes: self.max_drain_passes,
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::IVec3;

    #[test]
    fn test_defaults_are_valid() {
        let settings = CaptureSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.num_frames, 32);
        assert_eq!(settings.accumulation_limit(), AccumulationLimit::Bounded(1));
        assert_eq!(settings.save_flags(), SaveFlags::empty());
        assert_eq!(settings.scheduler_config().mode, TaskingMode::Sync);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "image_name": "sweep", "num_frames": 4, "async_tasking": true,
                        "camera_generator": "random",
                        "volume": { "dimensions": [8, 8, 8], "voxel_type": "ushort" } }"#;
        let settings: CaptureSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.image_name, "sweep");
        assert_eq!(settings.num_frames, 4);
        assert_eq!(settings.image_format, "png");
        assert_eq!(settings.camera_generator, GeneratorStrategy::Random);
        assert_eq!(settings.volume.dimensions, IVec3::splat(8));
        assert_eq!(settings.volume.voxel_type, crate::import::VoxelType::UShort);
        assert_eq!(settings.scheduler_config().mode, TaskingMode::Async);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.json");
        let settings = CaptureSettings {
            variance_threshold: 0.02,
            save_depth: true,
            seed: Some(9),
            ..CaptureSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(CaptureSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CaptureSettings::load(&dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn test_validation_failures() {
        let bad = [
            CaptureSettings { num_frames: 0, ..Default::default() },
            CaptureSettings { resolution: [0, 10], ..Default::default() },
            CaptureSettings { jitter: -1.0, ..Default::default() },
            CaptureSettings { zoom: f32::INFINITY, ..Default::default() },
            CaptureSettings { image_format: String::new(), ..Default::default() },
            CaptureSettings { accum_limit: Some(0), variance_threshold: 0.0, ..Default::default() },
            CaptureSettings { max_drain_passes: 0, ..Default::default() },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?}");
        }
    }

    #[test]
    fn test_variance_implies_unbounded() {
        let settings = CaptureSettings {
            variance_threshold: 0.01,
            ..Default::default()
        };
        assert_eq!(settings.accumulation_limit(), AccumulationLimit::Unbounded);
        settings.validate().unwrap();
    }

    #[test]
    fn test_save_flags() {
        let settings = CaptureSettings {
            save_albedo: true,
            save_normal: true,
            save_layers_separately: true,
            ..Default::default()
        };
        assert_eq!(settings.save_flags().bits(), 1 | 4 | 8);
    }
}
