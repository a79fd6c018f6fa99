use nebula_lod::TransitionCache;

use crate::allocator::SharedIndexBuffer;

/// One rung of a node's LOD ladder.
#[derive(Clone, Debug)]
pub struct LodLevel {
    pub(crate) batch_size: u32,
    /// Threshold driving selection.
    pub(crate) max_height_delta: f32,
    /// Threshold being accumulated by a delta pass, copied over on finalise.
    pub(crate) staging_height_delta: f32,
    pub(crate) transition: TransitionCache,
    pub(crate) index_buffer: Option<SharedIndexBuffer>,
}

impl LodLevel {
    pub(crate) fn new(batch_size: u32) -> Self {
        Self {
            batch_size,
            max_height_delta: 0.0,
            staging_height_delta: 0.0,
            transition: TransitionCache::default(),
            index_buffer: None,
        }
    }

    /// Vertices per side rendered at this level.
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn max_height_delta(&self) -> f32 {
        self.max_height_delta
    }

    pub fn staging_height_delta(&self) -> f32 {
        self.staging_height_delta
    }

    pub fn index_buffer(&self) -> Option<SharedIndexBuffer> {
        self.index_buffer
    }

    /// Indices in this level's index buffer, zero until one is assigned.
    pub fn index_count(&self) -> u32 {
        self.index_buffer.map_or(0, |buffer| buffer.index_count)
    }
}
