//! Headless terrain flythrough.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p nebula-demo -- --frames 120` for a host-memory run,
//! or add `--gpu` to upload buffers and render offscreen through wgpu.

mod flythrough;
mod gpu_view;

use clap::Parser;
use nebula_config::{CliArgs, Config, ConfigError};
use nebula_render::{GpuInitError, HeadlessContext, WgpuTerrainAllocator};
use nebula_terrain::{HeightmapSampler, HostBufferAllocator, Terrain, TerrainError};
use tracing::{error, info, warn};

use flythrough::Flythrough;
use gpu_view::OffscreenView;

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Terrain(#[from] TerrainError),

    #[error(transparent)]
    Gpu(#[from] GpuInitError),
}

/// Generate the heightfield described by `config` and build a terrain on it.
fn build_terrain(config: &Config) -> Result<Terrain, DemoError> {
    config.validate()?;
    let settings = config.terrain.to_settings();
    let heightfield = HeightmapSampler::new(config.heightmap.to_params()).generate(settings)?;
    Ok(Terrain::new(heightfield, config.terrain.max_vertex_record_size)?)
}

fn run_host(config: &Config, mut terrain: Terrain) {
    let mut allocator = HostBufferAllocator::new();
    terrain.load(&mut allocator);

    let mut fly = Flythrough::new(config);
    for frame in 0..config.demo.frames {
        let (camera, lod, draws) = fly.step(frame, &mut terrain, &mut allocator);
        tracing::debug!(frame, nodes = lod.len(), draws = draws.len(), ?camera);
    }
    info!(
        "Host buffers: {} vertex pairs live, {} shared index buffers, {} bytes",
        allocator.live_vertex_pairs(),
        allocator.shared_index_buffer_count(),
        allocator.total_bytes()
    );
    fly.log_summary();

    terrain.unload(&mut allocator);
}

fn run_gpu(config: &Config, mut terrain: Terrain) -> Result<(), DemoError> {
    let ctx = HeadlessContext::new_blocking()?;
    let mut allocator = WgpuTerrainAllocator::new(&ctx.device, &ctx.queue);
    terrain.load(&mut allocator);

    let mut view = OffscreenView::new(&ctx.device, 1280, config.camera.viewport_height);
    let fov = config.camera.fov_y_degrees.to_radians();
    let far = config.terrain.world_size * 2.0;

    let mut fly = Flythrough::new(config);
    let mut skipped = 0;
    for frame in 0..config.demo.frames {
        let (camera, _, draws) = fly.step(frame, &mut terrain, &mut allocator);
        let target = fly.path().look_target(&terrain);
        let view_proj = view.view_proj(fov, far, camera, target);
        let encoded = view.render(
            &ctx.device,
            &ctx.queue,
            &allocator,
            &terrain,
            view_proj,
            &draws,
        );
        skipped += draws.len() - encoded;
    }
    if skipped > 0 {
        warn!("{skipped} draws skipped for missing GPU buffers");
    }
    info!(
        "GPU buffers: {} vertex pairs live, {} pooled, {} bytes",
        allocator.live_vertex_pairs(),
        allocator.pooled_vertex_pairs(),
        allocator.allocated_bytes()
    );
    fly.log_summary();

    terrain.unload(&mut allocator);
    Ok(())
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(nebula_config::default_config_dir);

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let terrain = match build_terrain(&config) {
        Ok(terrain) => terrain,
        Err(e) => {
            error!("Failed to build terrain: {e}");
            std::process::exit(1);
        }
    };
    info!(
        "Terrain {}x{}: {} nodes, depth {}",
        config.terrain.size,
        config.terrain.size,
        terrain.quad_tree().node_count(),
        terrain.quad_tree().depth()
    );

    if config.demo.use_gpu {
        if let Err(e) = run_gpu(&config, terrain) {
            error!("GPU run failed: {e}");
            std::process::exit(1);
        }
    } else {
        run_host(&config, terrain);
    }
}
