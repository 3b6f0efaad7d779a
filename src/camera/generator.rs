//! Restartable camera-pose generator.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::util::{BBox3f, Error, Result, Vec3};

/// One camera pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSample {
    pub position: Vec3,
    pub up: Vec3,
    pub direction: Vec3,
}

impl CameraSample {
    /// Pose at `position` looking at `target`, with `Y` as the world up.
    pub fn looking_at(position: Vec3, target: Vec3) -> Self {
        let direction = (target - position).normalize_or_zero();
        let right = direction.cross(Vec3::Y).normalize_or_zero();
        let up = right.cross(direction);
        Self {
            position,
            up,
            direction,
        }
    }
}

/// How base positions are distributed around the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorStrategy {
    /// Deterministic offset Fibonacci lattice.
    #[default]
    Fibonacci,
    /// Uniformly random directions on the bounding sphere.
    Random,
}

impl fmt::Display for GeneratorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorStrategy::Fibonacci => f.write_str("fibonacci"),
            GeneratorStrategy::Random => f.write_str("random"),
        }
    }
}

impl FromStr for GeneratorStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fibonacci" => Ok(GeneratorStrategy::Fibonacci),
            "random" => Ok(GeneratorStrategy::Random),
            other => Err(Error::invalid(format!("unknown camera generator '{other}'"))),
        }
    }
}

/// Derived per-run state, rebuilt by [`CameraGenerator::reset`].
#[derive(Debug)]
struct SweepState {
    index: u32,
    center: Vec3,
    diagonal: f32,
    size: Vec3,
    epsilon: f32,
    rng: StdRng,
}

/// Produces `num_samples` camera poses around a bounding box.
///
/// Call [`reset`](Self::reset) before the first sample and to restart. A
/// reset generator replays the same sequence, including jitter and random
/// positions, because the RNG is reseeded from the generator's seed.
#[derive(Debug)]
pub struct CameraGenerator {
    strategy: GeneratorStrategy,
    bounds: BBox3f,
    num_samples: u32,
    jitter: f32,
    zoom: f32,
    flip_yz: bool,
    seed: Option<u64>,
    state: Option<SweepState>,
}

impl CameraGenerator {
    pub fn new(strategy: GeneratorStrategy, bounds: BBox3f, num_samples: u32) -> Self {
        Self {
            strategy,
            bounds,
            num_samples,
            jitter: 0.0,
            zoom: 0.0,
            flip_yz: false,
            seed: None,
            state: None,
        }
    }

    pub fn fibonacci(bounds: BBox3f, num_samples: u32) -> Self {
        Self::new(GeneratorStrategy::Fibonacci, bounds, num_samples)
    }

    pub fn random(bounds: BBox3f, num_samples: u32) -> Self {
        Self::new(GeneratorStrategy::Random, bounds, num_samples)
    }

    /// Random position offset as a fraction of the bounds size.
    pub fn with_jitter(mut self, jitter: f32) -> Self {
        self.jitter = jitter;
        self
    }

    /// Distance moved along the view direction (positive moves closer).
    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    /// Swap the y and z lattice axes, for z-up scenes.
    pub fn with_flip_yz(mut self, flip: bool) -> Self {
        self.flip_yz = flip;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn strategy(&self) -> GeneratorStrategy {
        self.strategy
    }

    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    /// Seed in use; set after the first reset when none was configured.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Index of the next sample, 0 before reset.
    pub fn sample_index(&self) -> u32 {
        self.state.as_ref().map_or(0, |s| s.index)
    }

    fn validate(&self) -> Result<()> {
        if self.num_samples == 0 {
            return Err(Error::invalid("camera generator needs at least one sample"));
        }
        if self.bounds.is_empty() {
            return Err(Error::invalid("camera generator bounds are empty"));
        }
        let diagonal = self.bounds.diagonal();
        if !diagonal.is_finite() || diagonal <= 0.0 {
            return Err(Error::invalid(format!(
                "degenerate camera generator bounds {:?}",
                self.bounds
            )));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(Error::invalid(format!("jitter {} must be finite and >= 0", self.jitter)));
        }
        if !self.zoom.is_finite() {
            return Err(Error::invalid(format!("zoom {} must be finite", self.zoom)));
        }
        Ok(())
    }

    /// Restart at sample 0 and recompute derived constants.
    pub fn reset(&mut self) -> Result<()> {
        self.validate()?;

        let seed = match self.seed {
            Some(seed) => seed,
            None => {
                let seed = rand::thread_rng().next_u64();
                tracing::info!(seed, "camera generator seeded from entropy");
                self.seed = Some(seed);
                seed
            }
        };

        self.state = Some(SweepState {
            index: 0,
            center: self.bounds.center(),
            diagonal: self.bounds.diagonal(),
            size: self.bounds.size(),
            epsilon: sphere_lattice::epsilon(self.num_samples),
            rng: StdRng::seed_from_u64(seed),
        });
        tracing::debug!(
            strategy = %self.strategy,
            samples = self.num_samples,
            jitter = self.jitter,
            zoom = self.zoom,
            "camera generator reset"
        );
        Ok(())
    }

    /// True while samples remain. False before the first reset.
    pub fn has_next(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.index < self.num_samples)
    }

    /// Produce the next pose and advance.
    pub fn next_sample(&mut self) -> Result<CameraSample> {
        let num_samples = self.num_samples;
        let (strategy, flip_yz) = (self.strategy, self.flip_yz);
        let (jitter, zoom) = (self.jitter, self.zoom);
        let state = self.state.as_mut().ok_or(Error::GeneratorNotReady)?;
        if state.index >= num_samples {
            return Err(Error::GeneratorExhausted { count: num_samples });
        }

        let [x, mut y, mut z] = match strategy {
            GeneratorStrategy::Fibonacci => {
                sphere_lattice::fibonacci_direction(state.index, num_samples, state.epsilon)
            }
            GeneratorStrategy::Random => {
                let (u, v): (f32, f32) = (state.rng.gen(), state.rng.gen());
                sphere_lattice::uniform_direction(u, v)
            }
        };
        if flip_yz {
            std::mem::swap(&mut y, &mut z);
        }

        let position = state.center + Vec3::new(x, y, z) * state.diagonal;
        let mut sample = CameraSample::looking_at(position, state.center);

        if jitter > 0.0 {
            let [jx, jy, jz] = sphere_lattice::uniform_direction(state.rng.gen(), state.rng.gen());
            sample.position += Vec3::new(jx, jy, jz) * jitter * state.size;
        }
        if zoom != 0.0 {
            sample.position += zoom * sample.direction;
        }

        state.index += 1;
        Ok(sample)
    }
}
