//! Scene nodes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::util::{BBox3f, Mat4, UVec3, Vec2, Vec3};

/// How instanced geometry is committed; also used as the world's scene mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceConfiguration {
    /// Fast rebuilds, for scenes that change often.
    #[default]
    Dynamic,
    /// Smaller acceleration structures.
    Compact,
    /// Robust traversal at some speed cost.
    Robust,
}

impl fmt::Display for InstanceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceConfiguration::Dynamic => write!(f, "dynamic"),
            InstanceConfiguration::Compact => write!(f, "compact"),
            InstanceConfiguration::Robust => write!(f, "robust"),
        }
    }
}

/// Voxel layout of a volume grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridLayout {
    /// Regular grid in cartesian coordinates.
    Structured,
    /// Grid in (radius, inclination, azimuth).
    Spherical,
}

/// Voxel data of an imported volume, normalized to `f32`.
#[derive(Clone)]
pub struct VolumeGrid {
    pub layout: GridLayout,
    pub dimensions: UVec3,
    pub origin: Vec3,
    pub spacing: Vec3,
    /// x-fastest voxel values
    pub voxels: Arc<[f32]>,
    /// (min, max) over all voxels
    pub value_range: Vec2,
}

impl VolumeGrid {
    /// Local-space bounds of the grid.
    pub fn bounds(&self) -> BBox3f {
        match self.layout {
            GridLayout::Structured => {
                let extent = (self.dimensions.as_vec3() - Vec3::ONE).max(Vec3::ZERO) * self.spacing;
                BBox3f::new(self.origin, self.origin + extent)
            }
            GridLayout::Spherical => {
                let cells = self.dimensions.x.saturating_sub(1) as f32;
                let radius = self.origin.x + self.spacing.x * cells;
                BBox3f::new(Vec3::splat(-radius), Vec3::splat(radius))
            }
        }
    }

    /// Voxel value at integer coordinates.
    #[inline]
    pub fn voxel(&self, x: u32, y: u32, z: u32) -> f32 {
        let d = self.dimensions;
        let idx = (z as usize * d.y as usize + y as usize) * d.x as usize + x as usize;
        self.voxels[idx]
    }
}

impl fmt::Debug for VolumeGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VolumeGrid")
            .field("layout", &self.layout)
            .field("dimensions", &self.dimensions)
            .field("value_range", &self.value_range)
            .finish_non_exhaustive()
    }
}

/// Transfer function attached to a volume.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFunction {
    /// Colormap preset name.
    pub colormap: String,
    pub value_range: Vec2,
}

/// Node payload.
#[derive(Debug, Clone)]
pub enum NodeKind {
    World,
    Transform {
        xfm: Mat4,
        instance: InstanceConfiguration,
    },
    Volume(Arc<VolumeGrid>),
    TransferFunction(TransferFunction),
    /// Index into the material registry.
    MaterialRef(usize),
}

/// Node of the scene tree. Children are owned.
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub kind: NodeKind,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            children: Vec::new(),
        }
    }

    /// Identity transform node.
    pub fn transform(name: impl Into<String>) -> Self {
        Self::new(
            name,
            NodeKind::Transform {
                xfm: Mat4::IDENTITY,
                instance: InstanceConfiguration::default(),
            },
        )
    }

    /// Builder: set the instance configuration of a transform node.
    pub fn with_instance_config(mut self, config: InstanceConfiguration) -> Self {
        if let NodeKind::Transform { instance, .. } = &mut self.kind {
            *instance = config;
        }
        self
    }

    /// Builder: append a child.
    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.children.push(child);
        self
    }

    /// Append a child, replacing any existing child with the same name.
    pub fn add_child(&mut self, child: SceneNode) {
        match self.children.iter_mut().find(|c| c.name == child.name) {
            Some(slot) => *slot = child,
            None => self.children.push(child),
        }
    }

    pub fn child(&self, name: &str) -> Option<&SceneNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut SceneNode> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Number of nodes in this subtree, including self.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(SceneNode::count).sum::<usize>()
    }

    /// World-space bounds of this subtree under `parent` transform.
    pub fn bounds(&self, parent: Mat4) -> BBox3f {
        let xfm = match &self.kind {
            NodeKind::Transform { xfm, .. } => parent * *xfm,
            _ => parent,
        };

        let mut bounds = match &self.kind {
            NodeKind::Volume(grid) => transform_bounds(&grid.bounds(), xfm),
            _ => BBox3f::EMPTY,
        };
        for child in &self.children {
            bounds.expand_by_box(&child.bounds(xfm));
        }
        bounds
    }

    /// Visit every volume with its accumulated transform.
    pub fn visit_volumes<F>(&self, parent: Mat4, f: &mut F)
    where
        F: FnMut(Mat4, &Arc<VolumeGrid>),
    {
        let xfm = match &self.kind {
            NodeKind::Transform { xfm, .. } => parent * *xfm,
            _ => parent,
        };
        if let NodeKind::Volume(grid) = &self.kind {
            f(xfm, grid);
        }
        for child in &self.children {
            child.visit_volumes(xfm, f);
        }
    }
}

/// Bounds of the eight transformed corners of `b`.
pub fn transform_bounds(b: &BBox3f, xfm: Mat4) -> BBox3f {
    if b.is_empty() {
        return BBox3f::EMPTY;
    }
    let mut out = BBox3f::EMPTY;
    for i in 0..8 {
        let corner = Vec3::new(
            if i & 1 == 0 { b.min.x } else { b.max.x },
            if i & 2 == 0 { b.min.y } else { b.max.y },
            if i & 4 == 0 { b.min.z } else { b.max.z },
        );
        out.expand_by_point(xfm.transform_point3(corner));
    }
    out
}
