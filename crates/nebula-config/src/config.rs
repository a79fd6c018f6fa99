//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use nebula_terrain::{Alignment, HeightmapParams, TerrainSettings};

use crate::error::ConfigError;

/// Top-level terrain viewer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Terrain grid and batching.
    pub terrain: TerrainConfig,
    /// LOD selection.
    pub lod: LodConfig,
    /// Projection used to derive the screen error coefficient.
    pub camera: CameraConfig,
    /// Procedural height generation.
    pub heightmap: HeightmapConfig,
    /// Headless fly-through.
    pub demo: DemoConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Up axis of the terrain grid.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlignmentConfig {
    #[default]
    XZ,
    XY,
    YZ,
}

impl From<AlignmentConfig> for Alignment {
    fn from(value: AlignmentConfig) -> Self {
        match value {
            AlignmentConfig::XZ => Alignment::XZ,
            AlignmentConfig::XY => Alignment::XY,
            AlignmentConfig::YZ => Alignment::YZ,
        }
    }
}

/// Terrain grid configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainConfig {
    /// Vertices per side, 2^n + 1.
    pub size: u32,
    /// World units covered by one side.
    pub world_size: f32,
    /// Vertices per side of the finest batch, 2^n + 1.
    pub max_batch_size: u32,
    /// Vertices per side of the coarsest batch, 2^n + 1.
    pub min_batch_size: u32,
    /// Depth of the skirts hanging below every batch edge.
    pub skirt_size: f32,
    pub alignment: AlignmentConfig,
    /// World position of the terrain centre.
    pub position: [f32; 3],
    /// Largest vertex data record, in vertices per side.
    pub max_vertex_record_size: u32,
}

/// LOD selection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LodConfig {
    /// Largest tolerated on-screen height error, in pixels.
    pub max_pixel_error: f32,
    /// Blend between levels in the vertex shader.
    pub enable_morph: bool,
}

/// Camera projection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    /// Viewport height in pixels.
    pub viewport_height: u32,
}

/// Noise heightmap configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeightmapConfig {
    pub seed: u32,
    pub octaves: u32,
    pub lacunarity: f64,
    pub persistence: f64,
    /// Frequency of the broadest octave, in cycles per world unit.
    pub base_frequency: f64,
    /// Height of the broadest octave, in world units.
    pub amplitude: f64,
}

/// Headless fly-through configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Frames to simulate.
    pub frames: u32,
    /// Camera height above the terrain origin.
    pub camera_altitude: f32,
    /// Upload through a wgpu device instead of host memory.
    pub use_gpu: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Enable wireframe rendering.
    pub wireframe: bool,
}

// --- Default implementations ---

impl Default for TerrainConfig {
    fn default() -> Self {
        let settings = TerrainSettings::default();
        Self {
            size: settings.size,
            world_size: settings.world_size,
            max_batch_size: settings.max_batch_size,
            min_batch_size: settings.min_batch_size,
            skirt_size: settings.skirt_size,
            alignment: AlignmentConfig::XZ,
            position: [0.0; 3],
            max_vertex_record_size: 129,
        }
    }
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            max_pixel_error: 3.0,
            enable_morph: true,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_y_degrees: 60.0,
            viewport_height: 720,
        }
    }
}

impl Default for HeightmapConfig {
    fn default() -> Self {
        let params = HeightmapParams::default();
        Self {
            seed: params.seed,
            octaves: params.octaves,
            lacunarity: params.lacunarity,
            persistence: params.persistence,
            base_frequency: params.base_frequency,
            amplitude: params.amplitude,
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            frames: 600,
            camera_altitude: 400.0,
            use_gpu: false,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            wireframe: false,
        }
    }
}

// --- Conversions ---

impl TerrainConfig {
    pub fn to_settings(&self) -> TerrainSettings {
        TerrainSettings {
            size: self.size,
            world_size: self.world_size,
            max_batch_size: self.max_batch_size,
            min_batch_size: self.min_batch_size,
            skirt_size: self.skirt_size,
            alignment: self.alignment.into(),
            position: self.position.into(),
        }
    }
}

impl HeightmapConfig {
    pub fn to_params(&self) -> HeightmapParams {
        HeightmapParams {
            seed: self.seed,
            octaves: self.octaves,
            lacunarity: self.lacunarity,
            persistence: self.persistence,
            base_frequency: self.base_frequency,
            amplitude: self.amplitude,
        }
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    /// Reject values the terrain cannot be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.terrain
            .to_settings()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("terrain: {e}")))?;

        let record = self.terrain.max_vertex_record_size;
        if !nebula_terrain::is_power_of_two_plus_one(record) || record < self.terrain.max_batch_size
        {
            return Err(ConfigError::Invalid(format!(
                "terrain: max_vertex_record_size {record} must be 2^n+1 and at least max_batch_size"
            )));
        }
        if !(self.lod.max_pixel_error > 0.0) {
            return Err(ConfigError::Invalid(
                "lod: max_pixel_error must be positive".to_string(),
            ));
        }
        if !(self.camera.fov_y_degrees > 0.0 && self.camera.fov_y_degrees < 180.0) {
            return Err(ConfigError::Invalid(
                "camera: fov_y_degrees must lie in (0, 180)".to_string(),
            ));
        }
        if self.camera.viewport_height == 0 {
            return Err(ConfigError::Invalid(
                "camera: viewport_height must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
