//! Capture driver: import, drain, sweep, render, save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::camera::{CameraGenerator, CameraSample};
use crate::import::{importer_for, ImportContext, ImportReport};
use crate::render::{render_to_convergence, CancelToken, OutputNamer, RenderEngine, StopReason};
use crate::scene::{
    AnimationRegistry, LightsManager, MaterialRegistry, NodeKind, SceneGraph, SceneHandle,
    SceneNode, SceneTree,
};
use crate::tasking::{DrainStats, Scheduler, TaskingMode};
use crate::util::{BBox3f, Error, Result, Vec3};

use super::settings::CaptureSettings;

const IMPORT_NODE: &str = "importXfm";
const MATERIAL_NODE: &str = "materialref";

/// Outcome of one [`CaptureDriver::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureSummary {
    /// Saved images, in capture order.
    pub frames: Vec<PathBuf>,
    /// Files whose subtree reached the scene.
    pub imported: usize,
    /// Files that failed to open or parse.
    pub import_failures: usize,
    /// Files without a matching importer.
    pub skipped: usize,
    /// Combined scheduler activity of all drains.
    pub drain: DrainStats,
    /// The sweep was stopped through the cancel token.
    pub cancelled: bool,
}

/// Per-run import bookkeeping.
#[derive(Debug, Default)]
struct ImportTally {
    imported: usize,
    failures: usize,
    skipped: usize,
    drain: DrainStats,
}

/// Drives a capture run against a render engine.
///
/// Owns the scheduler (created on, and bound to, the constructing thread),
/// the scene, and the output counter.
pub struct CaptureDriver<E: RenderEngine> {
    settings: CaptureSettings,
    engine: E,
    scheduler: Arc<Scheduler>,
    scene: SceneHandle,
    materials: Arc<Mutex<MaterialRegistry>>,
    lights: Arc<Mutex<LightsManager>>,
    animations: Arc<Mutex<AnimationRegistry>>,
    report: ImportReport,
    namer: OutputNamer,
    cancel: CancelToken,
    args: Vec<String>,
}

impl<E: RenderEngine> CaptureDriver<E> {
    pub fn new(settings: CaptureSettings, engine: E) -> Result<Self> {
        settings.validate()?;
        let scheduler = Scheduler::new(settings.scheduler_config())?;
        let namer = OutputNamer::new(settings.image_name.clone(), settings.image_format.clone());
        Ok(Self {
            settings,
            engine,
            scheduler,
            scene: SceneTree::new().into_handle(),
            materials: Arc::new(Mutex::new(MaterialRegistry::new())),
            lights: Arc::new(Mutex::new(LightsManager::new())),
            animations: Arc::new(Mutex::new(AnimationRegistry::new())),
            report: ImportReport::new(),
            namer,
            cancel: CancelToken::new(),
            args: Vec::new(),
        })
    }

    /// Raw command line handed to importers.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn scene(&self) -> &SceneHandle {
        &self.scene
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn import_report(&self) -> &ImportReport {
        &self.report
    }

    /// Token that stops the sweep after the current accumulation frame.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Import `files`, then render and save one image per camera sample.
    pub fn run(&mut self, files: &[PathBuf]) -> Result<CaptureSummary> {
        if files.is_empty() {
            return Err(Error::NoInputFiles);
        }
        let _span = tracing::info_span!("capture", files = files.len()).entered();
        tracing::info!("Pixel Heal Thyself capture started");

        self.update_renderer()?;
        let tally = self.refresh_scene(files)?;

        let mut generator = self.camera_generator();
        generator.reset()?;

        let mut summary = CaptureSummary {
            imported: tally.imported,
            import_failures: tally.failures,
            skipped: tally.skipped,
            drain: tally.drain,
            ..Default::default()
        };

        while generator.has_next() {
            let index = generator.sample_index();
            let sample = generator.next_sample()?;
            match self.capture_frame(index, &sample)? {
                Some(path) => summary.frames.push(path),
                None => {
                    tracing::warn!(index, "capture cancelled");
                    summary.cancelled = true;
                    break;
                }
            }
        }

        tracing::info!(
            frames = summary.frames.len(),
            imported = summary.imported,
            failures = summary.import_failures,
            "capture finished"
        );
        Ok(summary)
    }

    /// Push convergence settings into the engine.
    fn update_renderer(&mut self) -> Result<()> {
        let convergence = self.settings.convergence()?;
        tracing::debug!(?convergence, "renderer updated");
        self.engine.set_convergence(convergence);
        Ok(())
    }

    /// Build the world, import every file, and commit if anything changed.
    fn refresh_scene(&mut self, files: &[PathBuf]) -> Result<ImportTally> {
        let parent = {
            let mut scene = self.scene.lock();
            scene.set_scene_config(self.settings.scene_config);
            let default_material = self.materials.lock().default_index();
            scene.ensure_child(MATERIAL_NODE, || {
                SceneNode::new(MATERIAL_NODE, NodeKind::MaterialRef(default_material))
            });
            let instance = self.settings.instance_config;
            scene.ensure_child(IMPORT_NODE, || {
                SceneNode::transform(IMPORT_NODE).with_instance_config(instance)
            })
        };

        let tally = self.import_files(files, parent)?;
        let tracks = self.animations.lock().init();
        if tracks > 0 {
            tracing::debug!(tracks, "animations initialized");
        }

        let modified = self.scene.lock().mark_scene_modified();
        if modified {
            // Committing rewrites live engine state.
            self.engine.cancel_in_flight_frame();
            self.engine.wait_for_frame_stopped();
            self.engine.commit_scene(&self.scene.lock())?;
        }
        self.engine.reset_accumulation();
        Ok(tally)
    }

    fn import_context(&self, parent: String) -> ImportContext {
        ImportContext {
            frame_buffer: self.engine.frame_buffer(),
            materials: Arc::clone(&self.materials),
            lights: Arc::clone(&self.lights),
            args: self.args.clone(),
            animations: Arc::clone(&self.animations),
            instance_config: self.settings.instance_config,
            scheduler: Some(Arc::clone(&self.scheduler)),
            volume_params: self.settings.volume,
            scene: Arc::clone(&self.scene),
            parent,
            report: self.report.clone(),
        }
    }

    fn import_files(&mut self, files: &[PathBuf], parent: String) -> Result<ImportTally> {
        let ctx = self.import_context(parent);
        let imported_before = self.report.len();
        let mut tally = ImportTally::default();
        tracing::debug!(volume = ?ctx.volume_params, "using volume parameters");

        for file in files {
            match importer_for(file) {
                Some(importer) => {
                    tracing::info!(file = %file.display(), importer = importer.name(), "Importing");
                    if let Err(e) = importer.import_scene(file, &ctx) {
                        tracing::error!("Failed to open file '{}': {}", file.display(), e);
                        tally.failures += 1;
                    }
                }
                None => {
                    tracing::warn!(file = %file.display(), "no importer for file, skipping");
                    tally.skipped += 1;
                }
            }

            if self.scheduler.mode() == TaskingMode::Sync {
                tally.drain += self.scheduler.drain()?;
            }
        }
        tally.drain += self.scheduler.drain()?;

        tally.failures += tally.drain.failures;
        tally.imported = self.report.len() - imported_before;
        Ok(tally)
    }

    fn camera_generator(&self) -> CameraGenerator {
        let mut bounds = self.scene.lock().world_bounds();
        if bounds.is_empty() || bounds.diagonal() <= 0.0 {
            tracing::warn!(?bounds, "scene has no extent, sweeping a unit box");
            bounds = BBox3f::new(Vec3::splat(-1.0), Vec3::ONE);
        }
        CameraGenerator::new(self.settings.camera_generator, bounds, self.settings.num_frames)
            .with_jitter(self.settings.jitter)
            .with_zoom(self.settings.zoom)
            .with_flip_yz(self.settings.flip_yz)
            .with_seed(self.settings.seed)
    }

    /// Render one pose to convergence and save it. `None` when cancelled.
    fn capture_frame(&mut self, index: u32, sample: &CameraSample) -> Result<Option<PathBuf>> {
        let _span = tracing::info_span!("frame", index).entered();

        self.engine.set_camera(sample);
        self.engine.reset_accumulation();
        let threshold = self.settings.variance_threshold;
        let report = render_to_convergence(&mut self.engine, threshold, &self.cancel)?;
        tracing::info!(
            frames = report.frames,
            variance = report.variance,
            reason = ?report.reason,
            "rendered"
        );
        if report.reason == StopReason::Cancelled {
            return Ok(None);
        }

        let path = self.namer.next_path(self.settings.force_overwrite);
        self.save(&path)?;
        Ok(Some(path))
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        self.engine.save_frame(path, self.settings.save_flags())
    }
}

impl<E: RenderEngine> Drop for CaptureDriver<E> {
    fn drop(&mut self) {
        // Tasks left in the queues hold scheduler references.
        self.scheduler.shutdown();
    }
}

impl<E: RenderEngine> std::fmt::Debug for CaptureDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureDriver")
            .field("scheduler", &self.scheduler)
            .field("next_output", &self.namer.counter())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{ConvergenceSettings, FrameBufferInfo, SaveFlags};
    use crate::util::IVec3;
    use std::fs;

    /// Engine recording calls; variance halves every frame.
    #[derive(Default)]
    struct RecordingEngine {
        calls: Vec<String>,
        accum: u32,
        convergence: Option<ConvergenceSettings>,
        committed_volumes: usize,
    }

    impl RenderEngine for RecordingEngine {
        fn set_camera(&mut self, _camera: &CameraSample) {
            self.calls.push("camera".into());
        }
        fn commit_scene(&mut self, scene: &SceneTree) -> Result<()> {
            let mut n = 0;
            scene.root().visit_volumes(crate::util::Mat4::IDENTITY, &mut |_, _| n += 1);
            self.committed_volumes = n;
            self.calls.push("commit".into());
            Ok(())
        }
        fn start_new_frame(&mut self) -> Result<()> {
            self.accum += 1;
            Ok(())
        }
        fn variance(&self) -> f32 {
            1.0 / (1u32 << self.accum.min(30)) as f32
        }
        fn current_accumulation(&self) -> u32 {
            self.accum
        }
        fn accumulation_limit_reached(&self) -> bool {
            self.convergence.is_some_and(|c| c.limit.reached(self.accum))
        }
        fn reset_accumulation(&mut self) {
            self.accum = 0;
        }
        fn set_convergence(&mut self, settings: ConvergenceSettings) {
            self.convergence = Some(settings);
        }
        fn cancel_in_flight_frame(&mut self) {
            self.calls.push("cancel".into());
        }
        fn wait_for_frame_stopped(&mut self) {
            self.calls.push("wait".into());
        }
        fn save_frame(&mut self, path: &Path, _flags: SaveFlags) -> Result<()> {
            fs::write(path, format!("{}", self.accum))?;
            Ok(())
        }
        fn frame_buffer(&self) -> FrameBufferInfo {
            FrameBufferInfo::default()
        }
    }

    fn recording_driver(settings: CaptureSettings) -> CaptureDriver<RecordingEngine> {
        CaptureDriver::new(settings, RecordingEngine::default()).unwrap()
    }

    fn settings(dir: &Path) -> CaptureSettings {
        CaptureSettings {
            image_name: dir.join("img").to_string_lossy().into_owned(),
            num_frames: 3,
            volume: crate::import::VolumeParams {
                dimensions: IVec3::new(2, 2, 2),
                voxel_type: crate::import::VoxelType::UChar,
                ..Default::default()
            },
            ..CaptureSettings::default()
        }
    }

    #[test]
    fn test_no_input_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = recording_driver(settings(dir.path()));
        assert!(matches!(driver.run(&[]), Err(Error::NoInputFiles)));
        assert!(driver.engine().calls.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_run_imports_then_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let vol = dir.path().join("cube.raw");
        fs::write(&vol, [0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();

        let mut driver = recording_driver(settings(dir.path()));
        let summary = driver.run(&[vol]).unwrap();

        assert_eq!(summary.imported, 1);
        assert_eq!(summary.import_failures, 0);
        assert_eq!(summary.frames.len(), 3);
        assert_eq!(summary.frames[2], dir.path().join("img.0002.png"));
        assert_eq!(driver.engine().committed_volumes, 1);

        // The commit is preceded by cancel and wait, and happens before any camera.
        let calls = &driver.engine().calls;
        assert_eq!(&calls[..4], &["cancel", "wait", "commit", "camera"]);
        assert!(driver.scene().lock().find("world/importXfm/cube_rootXfm").is_some());
        assert!(driver.scene().lock().find("world/materialref").is_some());
    }

    #[test]
    fn test_failures_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.raw");
        fs::write(&good, [9u8; 8]).unwrap();
        let files = vec![
            dir.path().join("missing.raw"),
            dir.path().join("notes.txt"),
            good,
        ];

        for async_tasking in [false, true] {
            let mut s = settings(dir.path());
            s.async_tasking = async_tasking;
            s.worker_threads = 2;
            s.force_overwrite = true;
            let mut driver = CaptureDriver::new(s, RecordingEngine::default()).unwrap();
            let summary = driver.run(&files).unwrap();
            assert_eq!(summary.imported, 1);
            assert_eq!(summary.import_failures, 1);
            assert_eq!(summary.skipped, 1);
            assert_eq!(summary.frames.len(), 3);
        }
    }

    #[test]
    fn test_variance_controls_accumulation() {
        let dir = tempfile::tempdir().unwrap();
        let vol = dir.path().join("cube.raw");
        fs::write(&vol, [0u8; 8]).unwrap();

        let mut s = settings(dir.path());
        s.variance_threshold = 0.1;
        s.num_frames = 1;
        let mut driver = CaptureDriver::new(s, RecordingEngine::default()).unwrap();
        let summary = driver.run(&[vol]).unwrap();
        // 1/2, 1/4, 1/8, then 1/16 < 0.1
        assert_eq!(fs::read_to_string(&summary.frames[0]).unwrap(), "4");
    }

    #[test]
    fn test_empty_scene_still_sweeps() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = recording_driver(settings(dir.path()));
        let summary = driver.run(&[dir.path().join("gone.raw")]).unwrap();
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.import_failures, 1);
        assert_eq!(summary.frames.len(), 3);
    }

    #[test]
    fn test_cancel_stops_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = recording_driver(settings(dir.path()));
        driver.cancel_token().cancel();
        let summary = driver.run(&[dir.path().join("gone.raw")]).unwrap();
        assert!(summary.cancelled);
        assert!(summary.frames.is_empty());
    }
}
