//! Headless CPU preview renderer.
//!
//! Progressive maximum-intensity projection through the scene's volumes.
//! Every accumulation frame traces one jittered ray per pixel; rows are
//! rendered in parallel with rayon. A per-pixel running variance of the
//! luminance (Welford) drives convergence.
//!
//! ```text
//! commit_scene -> volume instances (world->local, grid)
//! start_new_frame -> rows (par) -> samples -> accumulate
//! save_frame -> color PNG [+ albedo/depth/normal layers]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageBuffer, Luma, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::camera::CameraSample;
use crate::scene::{GridLayout, SceneGraph, SceneTree, VolumeGrid};
use crate::util::{BBox3f, Error, Mat4, Result, Vec3};

use super::convergence::CancelToken;
use super::engine::{ConvergenceSettings, FrameBufferInfo, RenderEngine, SaveFlags};

const BACKGROUND_TOP: Vec3 = Vec3::new(0.22, 0.24, 0.28);
const BACKGROUND_BOTTOM: Vec3 = Vec3::new(0.05, 0.05, 0.06);

/// A volume placed in the world.
struct VolumeInstance {
    world_to_local: Mat4,
    local_to_world: Mat4,
    bounds: BBox3f,
    grid: Arc<VolumeGrid>,
    steps: u32,
}

/// One traced ray.
#[derive(Clone, Copy)]
struct Sample {
    color: Vec3,
    albedo: Vec3,
    normal: Vec3,
    depth: f32,
}

/// Accumulated state of one pixel.
#[derive(Clone, Copy, Default)]
struct Pixel {
    sum: Vec3,
    mean_lum: f32,
    m2_lum: f32,
    albedo: Vec3,
    normal: Vec3,
    depth: f32,
}

/// Camera basis for primary rays.
#[derive(Clone, Copy)]
struct RayCamera {
    position: Vec3,
    forward: Vec3,
    right: Vec3,
    up: Vec3,
    tan_half_fov: f32,
    aspect: f32,
}

impl RayCamera {
    fn new(sample: &CameraSample, fov_y: f32, aspect: f32) -> Self {
        let forward = sample.direction.normalize_or_zero();
        let right = forward.cross(sample.up).normalize_or_zero();
        let up = right.cross(forward);
        Self {
            position: sample.position,
            forward,
            right,
            up,
            tan_half_fov: (fov_y * 0.5).tan(),
            aspect,
        }
    }

    /// Ray direction through normalized device coordinates in [-1, 1].
    fn direction(&self, ndc_x: f32, ndc_y: f32) -> Vec3 {
        (self.forward
            + self.right * (ndc_x * self.tan_half_fov * self.aspect)
            + self.up * (ndc_y * self.tan_half_fov))
            .normalize_or_zero()
    }
}

/// CPU progressive renderer for headless capture.
pub struct PreviewEngine {
    info: FrameBufferInfo,
    fov_y: f32,
    camera: Option<CameraSample>,
    volumes: Vec<VolumeInstance>,
    bounds: BBox3f,
    pixels: Vec<Pixel>,
    frame_count: u32,
    variance: f32,
    convergence: ConvergenceSettings,
    cancel: CancelToken,
}

impl PreviewEngine {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid(format!("resolution {width}x{height} must be non-zero")));
        }
        Ok(Self {
            info: FrameBufferInfo {
                width,
                height,
                float_format: true,
            },
            fov_y: 60f32.to_radians(),
            camera: None,
            volumes: Vec::new(),
            bounds: BBox3f::EMPTY,
            pixels: vec![Pixel::default(); (width * height) as usize],
            frame_count: 0,
            variance: f32::INFINITY,
            convergence: ConvergenceSettings::default(),
            cancel: CancelToken::new(),
        })
    }

    /// Vertical field of view in degrees.
    pub fn with_fov(mut self, degrees: f32) -> Self {
        self.fov_y = degrees.clamp(1.0, 179.0).to_radians();
        self
    }

    /// Token that aborts the frame being rendered, checked between rows.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Number of committed volumes.
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn ray_camera(&self) -> RayCamera {
        let aspect = self.info.width as f32 / self.info.height as f32;
        match &self.camera {
            Some(camera) => RayCamera::new(camera, self.fov_y, aspect),
            None => {
                // Look at the scene from +z.
                let (center, radius) = if self.bounds.is_empty() {
                    (Vec3::ZERO, 1.0)
                } else {
                    (self.bounds.center(), self.bounds.diagonal().max(1e-3))
                };
                let fallback = CameraSample {
                    position: center + Vec3::Z * radius,
                    direction: -Vec3::Z,
                    up: Vec3::Y,
                };
                RayCamera::new(&fallback, self.fov_y, aspect)
            }
        }
    }

    fn trace(&self, origin: Vec3, dir: Vec3) -> Sample {
        let t = dir.y * 0.5 + 0.5;
        let background = BACKGROUND_BOTTOM.lerp(BACKGROUND_TOP, t);
        let mut out = Sample {
            color: background,
            albedo: Vec3::ZERO,
            normal: Vec3::ZERO,
            depth: f32::INFINITY,
        };

        let mut best = f32::NEG_INFINITY;
        for vol in &self.volumes {
            let local_origin = vol.world_to_local.transform_point3(origin);
            let local_dir = vol.world_to_local.transform_vector3(dir);
            let Some((near, far)) = vol.bounds.intersect_ray(local_origin, local_dir.recip()) else {
                continue;
            };

            let entry = local_origin + local_dir * near;
            let world_entry = vol.local_to_world.transform_point3(entry);
            let depth = (world_entry - origin).length();
            if depth < out.depth {
                out.depth = depth;
                let normal = vol.local_to_world.transform_vector3(face_normal(&vol.bounds, entry));
                out.normal = normal.normalize_or_zero();
            }

            if let Some(value) = max_intensity(vol, local_origin, local_dir, near, far) {
                if value > best {
                    best = value;
                }
            }
        }

        if best.is_finite() {
            let color = turbo(best);
            out.albedo = color;
            out.color = background.lerp(color, best.max(0.15));
        }
        out
    }

    fn render_row(&self, camera: &RayCamera, y: u32) -> Vec<Sample> {
        let (w, h) = (self.info.width, self.info.height);
        let mut rng = StdRng::seed_from_u64(((self.frame_count as u64) << 32) | y as u64);
        (0..w)
            .map(|x| {
                let jx: f32 = rng.gen();
                let jy: f32 = rng.gen();
                let ndc_x = ((x as f32 + jx) / w as f32) * 2.0 - 1.0;
                let ndc_y = 1.0 - ((y as f32 + jy) / h as f32) * 2.0;
                self.trace(camera.position, camera.direction(ndc_x, ndc_y))
            })
            .collect()
    }

    fn layer_path(path: &Path, layer: &str) -> PathBuf {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("png");
        path.with_extension(format!("{layer}.{ext}"))
    }

    fn save_rgb(&self, path: &Path, f: impl Fn(&Pixel) -> Vec3) -> Result<()> {
        let bytes: Vec<u8> = self
            .pixels
            .iter()
            .flat_map(|p| {
                let c = f(p).clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
                [c.x.round() as u8, c.y.round() as u8, c.z.round() as u8]
            })
            .collect();
        let img = RgbImage::from_raw(self.info.width, self.info.height, bytes)
            .ok_or_else(|| Error::other("frame buffer size mismatch"))?;
        img.save(path)?;
        Ok(())
    }

    fn save_depth(&self, path: &Path) -> Result<()> {
        let (lo, hi) = self
            .pixels
            .iter()
            .filter(|p| p.depth.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p.depth), hi.max(p.depth))
            });
        let span = (hi - lo).max(1e-6);
        let values: Vec<u16> = self
            .pixels
            .iter()
            .map(|p| {
                if p.depth.is_finite() {
                    (((p.depth - lo) / span) * 65534.0) as u16
                } else {
                    u16::MAX
                }
            })
            .collect();
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(self.info.width, self.info.height, values)
                .ok_or_else(|| Error::other("frame buffer size mismatch"))?;
        img.save(path)?;
        Ok(())
    }
}

impl RenderEngine for PreviewEngine {
    fn set_camera(&mut self, camera: &CameraSample) {
        self.camera = Some(*camera);
        self.reset_accumulation();
    }

    fn commit_scene(&mut self, scene: &SceneTree) -> Result<()> {
        let mut volumes = Vec::new();
        scene.root().visit_volumes(Mat4::IDENTITY, &mut |xfm, grid| {
            let max_dim = grid.dimensions.max_element().max(1);
            volumes.push(VolumeInstance {
                world_to_local: xfm.inverse(),
                local_to_world: xfm,
                bounds: grid.bounds(),
                grid: Arc::clone(grid),
                steps: (max_dim * 2).clamp(16, 512),
            });
        });
        self.bounds = scene.world_bounds();
        tracing::debug!(volumes = volumes.len(), "preview scene committed");
        self.volumes = volumes;
        self.reset_accumulation();
        Ok(())
    }

    fn start_new_frame(&mut self) -> Result<()> {
        let camera = self.ray_camera();
        let cancel = &self.cancel;
        let this = &*self;
        let rows: Option<Vec<Vec<Sample>>> = (0..self.info.height)
            .into_par_iter()
            .map(|y| {
                if cancel.is_cancelled() {
                    None
                } else {
                    Some(this.render_row(&camera, y))
                }
            })
            .collect();

        let Some(rows) = rows else {
            tracing::debug!(frame = self.frame_count + 1, "frame cancelled");
            return Ok(());
        };

        self.frame_count += 1;
        let n = self.frame_count as f32;
        let first = self.frame_count == 1;
        let samples: Vec<Sample> = rows.into_iter().flatten().collect();
        self.pixels
            .par_iter_mut()
            .zip(samples.par_iter())
            .for_each(|(px, s)| {
                px.sum += s.color;
                let lum = luminance(s.color);
                let delta = lum - px.mean_lum;
                px.mean_lum += delta / n;
                px.m2_lum += delta * (lum - px.mean_lum);
                if first {
                    px.albedo = s.albedo;
                    px.normal = s.normal;
                    px.depth = s.depth;
                }
            });

        self.variance = if self.frame_count < 2 {
            f32::INFINITY
        } else {
            let total: f64 = self
                .pixels
                .par_iter()
                .map(|p| (p.m2_lum / ((n - 1.0) * n)) as f64)
                .sum();
            (total / self.pixels.len() as f64) as f32
        };
        Ok(())
    }

    fn variance(&self) -> f32 {
        self.variance
    }

    fn current_accumulation(&self) -> u32 {
        self.frame_count
    }

    fn accumulation_limit_reached(&self) -> bool {
        self.convergence.limit.reached(self.frame_count)
    }

    fn reset_accumulation(&mut self) {
        self.frame_count = 0;
        self.variance = f32::INFINITY;
        self.pixels.fill(Pixel::default());
    }

    fn set_convergence(&mut self, settings: ConvergenceSettings) {
        self.convergence = settings;
    }

    fn cancel_in_flight_frame(&mut self) {
        self.cancel.cancel();
    }

    // Frames render inside `start_new_frame`, which holds `&mut self`, so no
    // frame can still be running here. Only the cancel flag needs clearing.
    fn wait_for_frame_stopped(&mut self) {
        self.cancel.reset();
    }

    fn save_frame(&mut self, path: &Path, flags: SaveFlags) -> Result<()> {
        if self.frame_count == 0 {
            return Err(Error::other("no accumulated frame to save"));
        }
        let n = self.frame_count as f32;
        self.save_rgb(path, |p| p.sum / n)?;

        // PNG has no layers, so extra layers always go to sibling files.
        if flags.contains(SaveFlags::ALBEDO) {
            self.save_rgb(&Self::layer_path(path, "albedo"), |p| p.albedo)?;
        }
        if flags.contains(SaveFlags::DEPTH) {
            self.save_depth(&Self::layer_path(path, "depth"))?;
        }
        if flags.contains(SaveFlags::NORMAL) {
            self.save_rgb(&Self::layer_path(path, "normal"), |p| {
                p.normal * 0.5 + Vec3::splat(0.5)
            })?;
        }
        tracing::info!(path = %path.display(), frames = self.frame_count, ?flags, "saved frame");
        Ok(())
    }

    fn frame_buffer(&self) -> FrameBufferInfo {
        self.info
    }
}

impl std::fmt::Debug for PreviewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewEngine")
            .field("info", &self.info)
            .field("volumes", &self.volumes.len())
            .field("frame_count", &self.frame_count)
            .field("variance", &self.variance)
            .finish_non_exhaustive()
    }
}

/// Maximum normalized voxel value along the ray segment, if any voxel was hit.
fn max_intensity(
    vol: &VolumeInstance,
    origin: Vec3,
    dir: Vec3,
    near: f32,
    far: f32,
) -> Option<f32> {
    let grid = &vol.grid;
    let range = grid.value_range;
    let span = (range.y - range.x).max(f32::EPSILON);
    let dt = (far - near) / vol.steps as f32;

    let mut best: Option<f32> = None;
    for i in 0..vol.steps {
        let t = near + dt * (i as f32 + 0.5);
        if let Some(v) = sample_grid(grid, origin + dir * t) {
            let v = ((v - range.x) / span).clamp(0.0, 1.0);
            best = Some(best.map_or(v, |b| b.max(v)));
        }
    }
    best
}

/// Nearest-neighbour lookup at a local-space point.
fn sample_grid(grid: &VolumeGrid, p: Vec3) -> Option<f32> {
    let coords = match grid.layout {
        GridLayout::Structured => (p - grid.origin) / grid.spacing,
        GridLayout::Spherical => {
            // (radius, inclination, azimuth), angles in radians
            let r = p.length();
            if r <= f32::EPSILON {
                return None;
            }
            let inclination = (p.z / r).clamp(-1.0, 1.0).acos();
            let azimuth = p.y.atan2(p.x).rem_euclid(std::f32::consts::TAU);
            (Vec3::new(r, inclination, azimuth) - grid.origin) / grid.spacing
        }
    };
    let idx = coords.round();
    let dims = grid.dimensions.as_vec3();
    if idx.cmplt(Vec3::ZERO).any() || idx.cmpge(dims).any() {
        return None;
    }
    Some(grid.voxel(idx.x as u32, idx.y as u32, idx.z as u32))
}

/// Outward normal of the box face closest to `p`.
fn face_normal(b: &BBox3f, p: Vec3) -> Vec3 {
    let d_min = (p - b.min).abs();
    let d_max = (b.max - p).abs();
    let mut best = (d_min.x, -Vec3::X);
    for (d, n) in [
        (d_max.x, Vec3::X),
        (d_min.y, -Vec3::Y),
        (d_max.y, Vec3::Y),
        (d_min.z, -Vec3::Z),
        (d_max.z, Vec3::Z),
    ] {
        if d < best.0 {
            best = (d, n);
        }
    }
    best.1
}

#[inline]
fn luminance(c: Vec3) -> f32 {
    0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z
}

/// Polynomial fit of the turbo colormap.
fn turbo(x: f32) -> Vec3 {
    let x = x.clamp(0.0, 1.0);
    let (x2, x3) = (x * x, x * x * x);
    let (x4, x5) = (x2 * x2, x2 * x3);
    let r = 0.135_721_38 + 4.615_392_6 * x - 42.660_32 * x2 + 132.131_08 * x3 - 152.942_39 * x4
        + 59.286_38 * x5;
    let g = 0.091_402_61 + 2.194_188_4 * x + 4.842_966_6 * x2 - 14.185_033 * x3 + 4.277_298_6 * x4
        + 2.829_566 * x5;
    let b = 0.106_673_3 + 12.641_946 * x - 60.582_05 * x2 + 110.362_77 * x3 - 89.903_11 * x4
        + 27.348_25 * x5;
    Vec3::new(r, g, b).clamp(Vec3::ZERO, Vec3::ONE)
}
