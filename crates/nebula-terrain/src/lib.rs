//! Quadtree terrain: height delta calculation, shared vertex data records, GPU buffer lifecycle and per-frame LOD selection.

mod allocator;
mod delta;
mod entity;
mod error;
mod heightfield;
mod heightmap;
mod index_data;
mod lod_level;
mod node;
mod quadtree;
mod selection;
mod settings;
mod terrain;
mod vertex_data;

pub use allocator::{
    BufferHandle, HostBufferAllocator, SharedIndexBuffer, TerrainBufferAllocator, VertexBufferPair,
};
pub use delta::{DELTA_MARGIN, calculate_height_deltas};
pub use entity::{
    DrawCommand, DrawList, MaterialFactory, MaterialId, MaterialLibrary, TerrainEntity,
    TerrainLayer, TerrainMaterialDesc, TextureId,
};
pub use error::TerrainError;
pub use heightfield::{Heightfield, HeightfieldSource};
pub use heightmap::{HeightmapParams, HeightmapSampler};
pub use index_data::{IndexBufferKey, index_count, skirt_vertex_index};
pub use lod_level::LodLevel;
pub use node::{NodeId, NodeLodState, QuadTreeNode};
pub use quadtree::QuadTree;
pub use selection::{FrameLod, LodSelectionParams, RenderedNode};
pub use settings::{Alignment, TerrainSettings, is_power_of_two_plus_one};
pub use terrain::Terrain;
pub use vertex_data::{DeltaVertex, PositionVertex, SKIRT_DELTA_THRESHOLD, VertexDataRecord};
