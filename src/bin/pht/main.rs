//! pht - Pixel Heal Thyself capture tool.
//!
//! Imports scene files, sweeps a camera around the result and saves one
//! converged image per pose.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use pixelheal::camera::GeneratorStrategy;
use pixelheal::capture::{CaptureDriver, CaptureSettings};
use pixelheal::import::VoxelType;
use pixelheal::render::PreviewEngine;
use pixelheal::scene::InstanceConfiguration;
use pixelheal::util::{IVec3, Vec3};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PHT_GIT_REV"),
    ", built ",
    env!("PHT_BUILD_DATE"),
    " ",
    env!("PHT_BUILD_TIME"),
    ")"
);

#[derive(Parser, Debug)]
#[command(
    name = "pht",
    version = VERSION,
    about = "Automated camera-sweep capture for render regression tests"
)]
struct Cli {
    /// Scene files to import
    files: Vec<PathBuf>,

    /// JSON settings file; command-line options override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Camera pose distribution
    #[arg(long, value_name = "fibonacci|random")]
    camera_generator: Option<GeneratorStrategy>,

    /// Swap y and z of generated positions (z-up scenes)
    #[arg(long)]
    camera_generator_flip_yz: bool,

    /// Number of camera poses
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    num_frames: Option<u32>,

    /// Random position offset as a fraction of the scene size
    #[arg(long)]
    jitter: Option<f32>,

    /// Move cameras along their view direction
    #[arg(long, allow_negative_numbers = true)]
    zoom: Option<f32>,

    /// Overwrite existing images instead of skipping their numbers
    #[arg(long)]
    force_overwrite: bool,

    /// Run background tasks on a worker pool
    #[arg(long)]
    async_tasking: bool,

    /// Output base name
    #[arg(long = "image", value_name = "NAME")]
    image_name: Option<String>,

    /// Output format (file extension)
    #[arg(long, value_name = "EXT")]
    format: Option<String>,

    /// Image size
    #[arg(long, value_name = "WxH", value_parser = parse_resolution)]
    resolution: Option<[u32; 2]>,

    /// Stop accumulating below this variance
    #[arg(long)]
    variance: Option<f32>,

    /// Maximum accumulation frames per image (0 = unbounded)
    #[arg(long)]
    accum_limit: Option<u32>,

    /// RNG seed for jitter and random cameras
    #[arg(long)]
    seed: Option<u64>,

    /// Background worker threads (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Abort a drain after this many productive passes
    #[arg(long)]
    max_drain_passes: Option<usize>,

    /// Raw volume dimensions
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    dimensions: Option<Vec<i32>>,

    /// Raw volume voxel type (uchar, short, ushort, int, float, double)
    #[arg(long)]
    voxel_type: Option<VoxelType>,

    /// Raw volume grid spacing
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    grid_spacing: Option<Vec<f32>>,

    /// Raw volume grid origin
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], allow_negative_numbers = true)]
    grid_origin: Option<Vec<f32>>,

    /// World scene configuration
    #[arg(long, value_parser = parse_instance_config)]
    scene_config: Option<InstanceConfiguration>,

    /// Instance configuration of imported subtrees
    #[arg(long, value_parser = parse_instance_config)]
    instance_config: Option<InstanceConfiguration>,

    /// Also save a depth layer
    #[arg(long)]
    save_depth: bool,

    /// Also save an albedo layer
    #[arg(long)]
    save_albedo: bool,

    /// Also save a normal layer
    #[arg(long)]
    save_normal: bool,

    /// Write each extra layer to its own file
    #[arg(long)]
    save_layers_separately: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn parse_resolution(s: &str) -> std::result::Result<[u32; 2], String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w = w.trim().parse::<u32>().map_err(|e| e.to_string())?;
    let h = h.trim().parse::<u32>().map_err(|e| e.to_string())?;
    Ok([w, h])
}

fn parse_instance_config(s: &str) -> std::result::Result<InstanceConfiguration, String> {
    match s.to_ascii_lowercase().as_str() {
        "dynamic" => Ok(InstanceConfiguration::Dynamic),
        "compact" => Ok(InstanceConfiguration::Compact),
        "robust" => Ok(InstanceConfiguration::Robust),
        other => Err(format!("unknown configuration '{other}' (dynamic, compact, robust)")),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn vec3(v: &[f32]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

/// Settings from the config file (if any) with command-line overrides.
fn build_settings(cli: &Cli) -> Result<CaptureSettings> {
    let mut s = match &cli.config {
        Some(path) => CaptureSettings::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CaptureSettings::default(),
    };

    if let Some(v) = cli.camera_generator {
        s.camera_generator = v;
    }
    s.flip_yz |= cli.camera_generator_flip_yz;
    if let Some(v) = cli.num_frames {
        s.num_frames = v;
    }
    if let Some(v) = cli.jitter {
        s.jitter = v;
    }
    if let Some(v) = cli.zoom {
        s.zoom = v;
    }
    s.force_overwrite |= cli.force_overwrite;
    s.async_tasking |= cli.async_tasking;
    if let Some(v) = &cli.image_name {
        s.image_name = v.clone();
    }
    if let Some(v) = &cli.format {
        s.image_format = v.trim_start_matches('.').to_string();
    }
    if let Some(v) = cli.resolution {
        s.resolution = v;
    }
    if let Some(v) = cli.variance {
        s.variance_threshold = v;
    }
    if cli.accum_limit.is_some() {
        s.accum_limit = cli.accum_limit;
    }
    if cli.seed.is_some() {
        s.seed = cli.seed;
    }
    if let Some(v) = cli.threads {
        s.worker_threads = v;
    }
    if let Some(v) = cli.max_drain_passes {
        s.max_drain_passes = v;
    }
    if let Some(v) = &cli.dimensions {
        s.volume.dimensions = IVec3::new(v[0], v[1], v[2]);
    }
    if let Some(v) = cli.voxel_type {
        s.volume.voxel_type = v;
    }
    if let Some(v) = &cli.grid_spacing {
        s.volume.grid_spacing = vec3(v);
    }
    if let Some(v) = &cli.grid_origin {
        s.volume.grid_origin = vec3(v);
    }
    if cli.scene_config.is_some() {
        s.scene_config = cli.scene_config;
    }
    if let Some(v) = cli.instance_config {
        s.instance_config = v;
    }
    s.save_depth |= cli.save_depth;
    s.save_albedo |= cli.save_albedo;
    s.save_normal |= cli.save_normal;
    s.save_layers_separately |= cli.save_layers_separately;

    s.validate().context("invalid settings")?;
    Ok(s)
}

fn run(cli: &Cli) -> Result<()> {
    let settings = build_settings(cli)?;
    let [width, height] = settings.resolution;
    let engine = PreviewEngine::new(width, height)?;

    let mut driver = CaptureDriver::new(settings, engine)?.with_args(std::env::args().collect());
    let summary = driver.run(&cli.files)?;

    if summary.cancelled {
        bail!("capture cancelled after {} images", summary.frames.len());
    }
    println!(
        "Saved {} images ({} imported, {} failed, {} skipped)",
        summary.frames.len(),
        summary.imported,
        summary.import_failures,
        summary.skipped
    );
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if cli.files.is_empty() {
        eprintln!("No files to import");
        return ExitCode::FAILURE;
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
