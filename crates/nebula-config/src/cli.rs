//! Command-line argument parsing for the terrain viewer.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Terrain viewer command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-terrain", about = "Quadtree terrain LOD viewer")]
pub struct CliArgs {
    /// Heightfield vertices per side (2^n + 1).
    #[arg(long)]
    pub size: Option<u32>,

    /// Largest tolerated on-screen error in pixels.
    #[arg(long)]
    pub max_pixel_error: Option<f32>,

    /// Disable LOD morphing.
    #[arg(long)]
    pub no_morph: bool,

    /// Noise seed.
    #[arg(long)]
    pub seed: Option<u32>,

    /// Number of frames to simulate.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Upload terrain buffers to a wgpu device.
    #[arg(long)]
    pub gpu: bool,

    /// Render materials as wireframe.
    #[arg(long)]
    pub wireframe: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(size) = args.size {
            self.terrain.size = size;
        }
        if let Some(err) = args.max_pixel_error {
            self.lod.max_pixel_error = err;
        }
        if args.no_morph {
            self.lod.enable_morph = false;
        }
        if let Some(seed) = args.seed {
            self.heightmap.seed = seed;
        }
        if let Some(frames) = args.frames {
            self.demo.frames = frames;
        }
        if args.gpu {
            self.demo.use_gpu = true;
        }
        if args.wireframe {
            self.debug.wireframe = true;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
