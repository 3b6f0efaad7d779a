//! Scene graph collaborator interface and the owned tree implementation.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::util::{BBox3f, Error, Mat4, Result};
use super::node::{InstanceConfiguration, NodeKind, SceneNode};

/// Structural access the capture pipeline needs from a scene graph.
pub trait SceneGraph {
    /// Insert `subtree` under the node at `parent` (a `/`-separated path
    /// starting at the root).
    fn insert_subtree(&mut self, parent: &str, subtree: SceneNode) -> Result<()>;

    /// Return whether the structure changed since the previous call, and
    /// clear the flag.
    fn mark_scene_modified(&mut self) -> bool;

    /// World-space bounds of everything in the scene.
    fn world_bounds(&self) -> BBox3f;
}

/// Shared handle for engine-affine tasks.
///
/// Only tasks on the engine queue lock this for writing.
pub type SceneHandle = Arc<Mutex<SceneTree>>;

/// Owned scene tree rooted at a `world` node.
#[derive(Debug, Clone)]
pub struct SceneTree {
    root: SceneNode,
    modified: bool,
    scene_config: Option<InstanceConfiguration>,
}

impl SceneTree {
    pub const ROOT: &'static str = "world";

    pub fn new() -> Self {
        Self {
            root: SceneNode::new(Self::ROOT, NodeKind::World),
            modified: false,
            scene_config: None,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_handle(self) -> SceneHandle {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> &SceneNode {
        &self.root
    }

    /// World mode flag (dynamic/compact/robust).
    pub fn scene_config(&self) -> Option<InstanceConfiguration> {
        self.scene_config
    }

    pub fn set_scene_config(&mut self, config: Option<InstanceConfiguration>) {
        if self.scene_config != config {
            self.scene_config = config;
            self.modified = true;
        }
    }

    /// Look up a node by `/`-separated path, e.g. `world/importXfm`.
    pub fn find(&self, path: &str) -> Option<&SceneNode> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        if parts.next()? != self.root.name {
            return None;
        }
        parts.try_fold(&self.root, |node, name| node.child(name))
    }

    fn find_mut(&mut self, path: &str) -> Option<&mut SceneNode> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        if parts.next()? != self.root.name {
            return None;
        }
        parts.try_fold(&mut self.root, |node, name| node.child_mut(name))
    }

    /// Ensure a direct child of the root exists, creating it with `make`.
    pub fn ensure_child(&mut self, name: &str, make: impl FnOnce() -> SceneNode) -> String {
        if self.root.child(name).is_none() {
            self.root.add_child(make());
            self.modified = true;
        }
        format!("{}/{}", Self::ROOT, name)
    }

    /// Total node count, including the root.
    pub fn node_count(&self) -> usize {
        self.root.count()
    }
}

impl Default for SceneTree {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph for SceneTree {
    fn insert_subtree(&mut self, parent: &str, subtree: SceneNode) -> Result<()> {
        let node = self
            .find_mut(parent)
            .ok_or_else(|| Error::NodeNotFound(parent.to_string()))?;
        tracing::debug!(parent, node = %subtree.name, nodes = subtree.count(), "insert subtree");
        node.add_child(subtree);
        self.modified = true;
        Ok(())
    }

    fn mark_scene_modified(&mut self) -> bool {
        std::mem::take(&mut self.modified)
    }

    fn world_bounds(&self) -> BBox3f {
        self.root.bounds(Mat4::IDENTITY)
    }
}
