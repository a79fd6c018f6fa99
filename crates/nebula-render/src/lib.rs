//! wgpu backend for quadtree terrain: pooled vertex buffers, shared index buffers and morphing draw encoding.

pub mod draw;
pub mod gpu;
pub mod pipeline;
pub mod terrain_buffers;

pub use draw::{DRAW_UNIFORM_STRIDE, DrawUniform, DrawUniformBuffer, draw_uniform_bytes, encode_draws};
pub use gpu::{GpuInitError, HeadlessContext};
pub use pipeline::{
    DELTA_LAYOUT, POSITION_LAYOUT, TERRAIN_SHADER_SOURCE, TerrainCameraUniform, TerrainPipeline,
    terrain_primitive_state,
};
pub use terrain_buffers::WgpuTerrainAllocator;
