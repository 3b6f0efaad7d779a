//! Scene importers.
//!
//! An importer turns one file into a scene subtree in two phases: a
//! background phase that parses the file into locally owned nodes, and an
//! engine-affine phase that inserts the subtree into the shared scene. With a
//! [`Scheduler`] present the phases are chained tasks; without one both run
//! inline on the calling thread.

mod raw;
mod volume;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::render::FrameBufferInfo;
use crate::scene::{
    AnimationRegistry, InstanceConfiguration, LightsManager, MaterialRegistry, SceneHandle,
};
use crate::tasking::Scheduler;
use crate::util::Result;

pub use raw::RawVolumeImporter;
pub use volume::{load_raw_volume, VolumeParams, VoxelType};

/// A file importer.
pub trait Importer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Import `path` under `ctx.parent`.
    ///
    /// With a scheduler in `ctx` this only enqueues work; errors from the
    /// deferred phases surface as failed tasks of the next drain.
    fn import_scene(&self, path: &Path, ctx: &ImportContext) -> Result<()>;
}

/// Pick an importer by file extension. Unknown extensions yield `None`.
pub fn importer_for(path: &Path) -> Option<Box<dyn Importer>> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "raw" => Some(Box::new(RawVolumeImporter)),
        _ => None,
    }
}

/// One completed import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub file: PathBuf,
    /// Name of the subtree root inserted into the scene.
    pub root: String,
    /// Nodes in the inserted subtree.
    pub nodes: usize,
}

/// Completed imports, recorded by ui-affine tasks.
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    records: Arc<Mutex<Vec<ImportRecord>>>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: ImportRecord) {
        tracing::info!(
            file = %record.file.display(),
            root = %record.root,
            nodes = record.nodes,
            "imported"
        );
        self.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<ImportRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// Everything an importer may use. Importers take what they need.
#[derive(Clone)]
pub struct ImportContext {
    pub frame_buffer: FrameBufferInfo,
    pub materials: Arc<Mutex<MaterialRegistry>>,
    pub lights: Arc<Mutex<LightsManager>>,
    /// Raw command line, for importers with their own options.
    pub args: Vec<String>,
    pub animations: Arc<Mutex<AnimationRegistry>>,
    pub instance_config: InstanceConfiguration,
    pub scheduler: Option<Arc<Scheduler>>,
    pub volume_params: VolumeParams,
    pub scene: SceneHandle,
    /// Path of the node imported subtrees are inserted under.
    pub parent: String,
    pub report: ImportReport,
}

impl ImportContext {
    /// Context with default registries importing directly under the scene root.
    pub fn new(scene: SceneHandle, scheduler: Option<Arc<Scheduler>>) -> Self {
        Self {
            frame_buffer: FrameBufferInfo::default(),
            materials: Arc::new(Mutex::new(MaterialRegistry::new())),
            lights: Arc::new(Mutex::new(LightsManager::new())),
            args: Vec::new(),
            animations: Arc::new(Mutex::new(AnimationRegistry::new())),
            instance_config: InstanceConfiguration::default(),
            scheduler,
            volume_params: VolumeParams::default(),
            scene,
            parent: crate::scene::SceneTree::ROOT.to_string(),
            report: ImportReport::new(),
        }
    }
}

impl std::fmt::Debug for ImportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportContext")
            .field("parent", &self.parent)
            .field("instance_config", &self.instance_config)
            .field("volume_params", &self.volume_params)
            .field("scheduled", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_importer_for_extension() {
        assert_eq!(importer_for(Path::new("a/b/skull.raw")).map(|i| i.name()), Some("raw"));
        assert_eq!(importer_for(Path::new("shell.spherical.RAW")).map(|i| i.name()), Some("raw"));
        assert!(importer_for(Path::new("mesh.obj")).is_none());
        assert!(importer_for(Path::new("noext")).is_none());
    }

    #[test]
    fn test_report_shared_between_clones() {
        let report = ImportReport::new();
        let clone = report.clone();
        clone.record(ImportRecord {
            file: "a.raw".into(),
            root: "a_rootXfm".into(),
            nodes: 3,
        });
        assert_eq!(report.len(), 1);
        assert_eq!(report.records()[0].root, "a_rootXfm");
    }
}
