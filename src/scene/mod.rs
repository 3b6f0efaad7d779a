//! Scene graph: node model, tree, and shared registries.

mod graph;
mod node;
mod registry;

pub use graph::{SceneGraph, SceneHandle, SceneTree};
pub use node::{
    transform_bounds, GridLayout, InstanceConfiguration, NodeKind, SceneNode, TransferFunction,
    VolumeGrid,
};
pub use registry::{AnimationRegistry, Light, LightKind, LightsManager, MaterialRegistry};
