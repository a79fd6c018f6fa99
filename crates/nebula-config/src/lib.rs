//! Configuration for the terrain viewer.
//!
//! Settings persist to disk as RON files. CLI overrides come from clap, and
//! unknown or missing fields fall back to defaults so old files keep loading.

mod cli;
mod config;
mod error;

use std::path::PathBuf;

pub use cli::CliArgs;
pub use config::{
    AlignmentConfig, CameraConfig, Config, DebugConfig, DemoConfig, HeightmapConfig, LodConfig,
    TerrainConfig,
};
pub use error::ConfigError;

/// Platform config directory for the viewer, falling back to the working
/// directory when the platform has none.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("nebula-terrain"))
        .unwrap_or_else(|| PathBuf::from("."))
}
