//! Raw voxel volume importer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::scene::{
    GridLayout, InstanceConfiguration, NodeKind, SceneGraph, SceneNode, TransferFunction,
};
use crate::tasking::Scheduler;
use crate::util::{Result, Vec2};

use super::volume::{load_raw_volume, VolumeParams};
use super::{ImportContext, ImportRecord, ImportReport, Importer};

const TRANSFER_FUNCTION: &str = "transfer_function_turbo";

/// Imports `*.raw` voxel grids. `*.spherical.raw` files load as spherical grids.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVolumeImporter;

impl Importer for RawVolumeImporter {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn import_scene(&self, path: &Path, ctx: &ImportContext) -> Result<()> {
        let load = LoadJob {
            path: path.to_path_buf(),
            params: ctx.volume_params,
            instance: ctx.instance_config,
            insert: InsertJob {
                scene: Arc::clone(&ctx.scene),
                parent: ctx.parent.clone(),
                report: ctx.report.clone(),
                scheduler: ctx.scheduler.clone(),
            },
        };

        match &ctx.scheduler {
            Some(scheduler) => {
                let name = format!("load raw volume from {}", path.display());
                scheduler.background().submit(name, move || load.run())
            }
            None => load.run(),
        }
    }
}

/// Background phase: owns copies of everything it reads.
struct LoadJob {
    path: PathBuf,
    params: VolumeParams,
    instance: InstanceConfiguration,
    insert: InsertJob,
}

impl LoadJob {
    fn run(self) -> Result<()> {
        let subtree = build_subtree(&self.path, &self.params, self.instance)?;
        let insert = self.insert;
        match insert.scheduler.clone() {
            Some(scheduler) => {
                let name = format!("add raw volume from {} to scene", self.path.display());
                let path = self.path;
                scheduler.engine().submit(name, move || insert.run(path, subtree))
            }
            None => insert.run(self.path, subtree),
        }
    }
}

/// Engine phase: the only place the shared scene is mutated.
struct InsertJob {
    scene: crate::scene::SceneHandle,
    parent: String,
    report: ImportReport,
    scheduler: Option<Arc<Scheduler>>,
}

impl InsertJob {
    fn run(self, path: PathBuf, subtree: SceneNode) -> Result<()> {
        let record = ImportRecord {
            file: path,
            root: subtree.name.clone(),
            nodes: subtree.count(),
        };
        self.scene.lock().insert_subtree(&self.parent, subtree)?;

        let report = self.report;
        match &self.scheduler {
            Some(scheduler) => scheduler
                .ui()
                .submit(format!("report import of {}", record.file.display()), move || {
                    report.record(record);
                    Ok(())
                }),
            None => {
                report.record(record);
                Ok(())
            }
        }
    }
}

/// `<stem>_rootXfm` -> `<stem>_volume` -> transfer function.
fn build_subtree(
    path: &Path,
    params: &VolumeParams,
    instance: InstanceConfiguration,
) -> Result<SceneNode> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let layout = if Path::new(&stem).extension().is_some_and(|e| e == "spherical") {
        GridLayout::Spherical
    } else {
        GridLayout::Structured
    };

    let grid = load_raw_volume(path, params, layout)?;
    let value_range: Vec2 = grid.value_range;

    let tf = SceneNode::new(
        TRANSFER_FUNCTION,
        NodeKind::TransferFunction(TransferFunction {
            colormap: "turbo".into(),
            value_range,
        }),
    );
    let volume =
        SceneNode::new(format!("{stem}_volume"), NodeKind::Volume(Arc::new(grid))).with_child(tf);

    Ok(SceneNode::transform(format!("{stem}_rootXfm"))
        .with_instance_config(instance)
        .with_child(volume))
}
