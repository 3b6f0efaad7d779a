//! Shared registries importers can attach to: materials, lights, animations.

use crate::util::Vec3;

/// Named materials referenced by index from `MaterialRef` nodes.
#[derive(Debug, Clone)]
pub struct MaterialRegistry {
    names: Vec<String>,
    default: usize,
}

impl MaterialRegistry {
    pub const DEFAULT_MATERIAL: &'static str = "default";

    pub fn new() -> Self {
        Self {
            names: vec![Self::DEFAULT_MATERIAL.to_string()],
            default: 0,
        }
    }

    /// Register a material, returning its index. Existing names are reused.
    pub fn add(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(idx) = self.index_of(&name) {
            return idx;
        }
        self.names.push(name);
        self.names.len() - 1
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn name(&self, idx: usize) -> Option<&str> {
        self.names.get(idx).map(String::as_str)
    }

    /// Index assigned to geometry without an explicit material.
    pub fn default_index(&self) -> usize {
        self.default
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for MaterialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Light source kinds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Ambient,
    Distant { direction: Vec3 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub name: String,
    pub kind: LightKind,
    pub intensity: f32,
}

/// Lights in the world. Starts with a single ambient light.
#[derive(Debug, Clone)]
pub struct LightsManager {
    lights: Vec<Light>,
}

impl LightsManager {
    pub fn new() -> Self {
        Self {
            lights: vec![Light {
                name: "ambient".into(),
                kind: LightKind::Ambient,
                intensity: 1.0,
            }],
        }
    }

    /// Add a light; returns false if the name is taken.
    pub fn add_light(&mut self, light: Light) -> bool {
        if self.lights.iter().any(|l| l.name == light.name) {
            tracing::warn!(name = %light.name, "light already exists");
            return false;
        }
        self.lights.push(light);
        true
    }

    pub fn remove_light(&mut self, name: &str) -> bool {
        let before = self.lights.len();
        self.lights.retain(|l| l.name != name);
        self.lights.len() != before
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    /// Total ambient contribution.
    pub fn ambient_intensity(&self) -> f32 {
        self.lights
            .iter()
            .filter(|l| l.kind == LightKind::Ambient)
            .map(|l| l.intensity)
            .sum()
    }
}

impl Default for LightsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Animated sequences discovered during import.
#[derive(Debug, Clone, Default)]
pub struct AnimationRegistry {
    tracks: Vec<String>,
    initialized: bool,
}

impl AnimationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, track: impl Into<String>) {
        self.tracks.push(track.into());
    }

    pub fn tracks(&self) -> &[String] {
        &self.tracks
    }

    /// Finalize after all imports. Returns the number of tracks.
    pub fn init(&mut self) -> usize {
        self.initialized = true;
        self.tracks.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
