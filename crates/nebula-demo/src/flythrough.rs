//! Scripted camera flight over the terrain.
//!
//! The camera circles the terrain centre at a fixed height above the ground
//! and periodically digs a small crater beneath itself, so every frame
//! exercises selection and some frames exercise the dirty-rect update.

use std::f32::consts::TAU;

use glam::Vec3;
use nebula_config::Config;
use nebula_lod::ErrorCoefficient;
use nebula_terrain::{
    DrawList, FrameLod, LodSelectionParams, MaterialLibrary, Terrain, TerrainBufferAllocator,
};
use tracing::{debug, info};

/// Crater half-width in grid cells.
const CRATER_RADIUS: u32 = 2;
const CRATER_DEPTH: f32 = 20.0;

/// Circular path in grid space.
#[derive(Clone, Copy, Debug)]
pub struct FlightPath {
    centre: f32,
    radius: f32,
    altitude: f32,
    frames: u32,
}

impl FlightPath {
    pub fn new(size: u32, altitude: f32, frames: u32) -> Self {
        let centre = (size - 1) as f32 * 0.5;
        Self {
            centre,
            radius: centre * 0.6,
            altitude,
            frames: frames.max(1),
        }
    }

    /// Grid vertex under the camera at `frame`.
    pub fn grid_position(&self, frame: u32) -> (u32, u32) {
        let angle = (frame % self.frames) as f32 / self.frames as f32 * TAU;
        let x = self.centre + self.radius * angle.cos();
        let y = self.centre + self.radius * angle.sin();
        (x.round().max(0.0) as u32, y.round().max(0.0) as u32)
    }

    pub fn camera_position(&self, terrain: &Terrain, frame: u32) -> Vec3 {
        let (x, y) = self.grid_position(frame);
        let ground = terrain.height_at(x, y);
        terrain.settings().point(x, y, ground + self.altitude)
    }

    /// Point the camera looks at: the centre of the terrain at ground level.
    pub fn look_target(&self, terrain: &Terrain) -> Vec3 {
        let c = self.centre as u32;
        terrain.settings().point(c, c, terrain.height_at(c, c))
    }
}

/// Aggregate numbers over a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u32,
    pub total_draws: usize,
    pub min_draws: usize,
    pub max_draws: usize,
    pub edits: u32,
    /// Finest level index drawn in any frame.
    pub finest_lod: Option<usize>,
}

/// Drives a [`Terrain`] along a [`FlightPath`].
pub struct Flythrough {
    path: FlightPath,
    error_coefficient: ErrorCoefficient,
    enable_morph: bool,
    wireframe: bool,
    edit_interval: u32,
    materials: MaterialLibrary,
    summary: RunSummary,
}

impl Flythrough {
    pub fn new(config: &Config) -> Self {
        let error_coefficient = ErrorCoefficient::from_projection(
            config.camera.fov_y_degrees.to_radians(),
            config.camera.viewport_height,
            config.lod.max_pixel_error,
        );
        let frames = config.demo.frames;
        Self {
            path: FlightPath::new(config.terrain.size, config.demo.camera_altitude, frames),
            error_coefficient,
            enable_morph: config.lod.enable_morph,
            wireframe: config.debug.wireframe,
            edit_interval: (frames / 4).max(1),
            materials: MaterialLibrary::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn path(&self) -> &FlightPath {
        &self.path
    }

    pub fn materials(&self) -> &MaterialLibrary {
        &self.materials
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Advance one frame. Returns the camera position with the frame's
    /// selection and draws.
    pub fn step(
        &mut self,
        frame: u32,
        terrain: &mut Terrain,
        allocator: &mut dyn TerrainBufferAllocator,
    ) -> (Vec3, FrameLod, DrawList) {
        if frame > 0 && frame % self.edit_interval == 0 {
            let (x, y) = self.path.grid_position(frame);
            dig_crater(terrain, x, y);
            if let Some(rect) = terrain.update_dirty(allocator) {
                debug!("frame {frame}: rebuilt {rect:?} after crater at ({x}, {y})");
            }
            self.summary.edits += 1;
        }

        let camera_position = self.path.camera_position(terrain, frame);
        let params = LodSelectionParams {
            camera_position,
            error_coefficient: self.error_coefficient,
            enable_morph: self.enable_morph,
        };
        let (lod, draws) = terrain.update(&params, &mut self.materials);
        if self.wireframe {
            terrain.set_wireframe(&mut self.materials, true);
        }

        self.record(&lod, &draws);
        (camera_position, lod, draws)
    }

    fn record(&mut self, lod: &FrameLod, draws: &DrawList) {
        let s = &mut self.summary;
        s.min_draws = if s.frames == 0 {
            draws.len()
        } else {
            s.min_draws.min(draws.len())
        };
        s.max_draws = s.max_draws.max(draws.len());
        s.total_draws += draws.len();
        s.frames += 1;
        if let Some(finest) = lod.rendered.iter().map(|r| r.lod).min() {
            s.finest_lod = Some(s.finest_lod.map_or(finest, |f| f.min(finest)));
        }
    }

    pub fn log_summary(&self) {
        let s = &self.summary;
        let mean = if s.frames == 0 {
            0.0
        } else {
            s.total_draws as f64 / s.frames as f64
        };
        info!(
            frames = s.frames,
            edits = s.edits,
            min_draws = s.min_draws,
            max_draws = s.max_draws,
            mean_draws = mean,
            materials = self.materials().len(),
            "flythrough complete"
        );
    }
}

fn dig_crater(terrain: &mut Terrain, cx: u32, cy: u32) {
    let last = terrain.settings().size - 1;
    for y in cy.saturating_sub(CRATER_RADIUS)..=(cy + CRATER_RADIUS).min(last) {
        for x in cx.saturating_sub(CRATER_RADIUS)..=(cx + CRATER_RADIUS).min(last) {
            let h = terrain.height_at(x, y);
            terrain.set_height(x, y, h - CRATER_DEPTH);
        }
    }
}
