//! Buffer allocation interface between the quadtree and a rendering backend.
//!
//! Vertex buffer pairs are pooled by vertex count and index buffers are shared
//! by [`IndexBufferKey`]. A backend that cannot satisfy a request returns
//! `None`; the caller skips upload and drawing for that node and retries on a
//! later pass.

use log::debug;
use rustc_hash::FxHashMap;

use crate::index_data::IndexBufferKey;
use crate::vertex_data::{DeltaVertex, PositionVertex};

/// Opaque backend buffer identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Position and delta streams for one vertex data record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexBufferPair {
    pub positions: BufferHandle,
    pub deltas: BufferHandle,
    pub vertex_count: usize,
}

/// A shared index buffer and the number of indices it holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SharedIndexBuffer {
    pub handle: BufferHandle,
    pub index_count: u32,
}

/// Backend storage for terrain geometry.
pub trait TerrainBufferAllocator {
    /// Hand out a position/delta buffer pair for `vertex_count` vertices,
    /// reusing a pooled pair of the same size when one is free.
    fn allocate_vertex_buffers(&mut self, vertex_count: usize) -> Option<VertexBufferPair>;

    /// Overwrite both buffers of `pair` with the given vertex data.
    fn write_vertex_buffers(
        &mut self,
        pair: &VertexBufferPair,
        positions: &[PositionVertex],
        deltas: &[DeltaVertex],
    );

    /// Return a pair to the pool.
    fn free_vertex_buffers(&mut self, pair: VertexBufferPair);

    /// Fetch the index buffer for `key`, generating it on first request.
    fn shared_index_buffer(&mut self, key: &IndexBufferKey) -> Option<SharedIndexBuffer>;

    /// Drop one reference to a shared index buffer.
    fn release_index_buffer(&mut self, buffer: SharedIndexBuffer);
}

struct SharedEntry {
    buffer: SharedIndexBuffer,
    refs: usize,
}

/// [`TerrainBufferAllocator`] backed by host memory.
///
/// Used for headless runs and to inspect uploaded data in tests. Buffers are
/// stored as 32-bit words, which every terrain vertex and index type is
/// built from. An optional limit on live vertex buffer pairs simulates an
/// exhausted backend.
#[derive(Default)]
pub struct HostBufferAllocator {
    next_handle: u32,
    buffers: FxHashMap<BufferHandle, Vec<u32>>,
    free_pairs: FxHashMap<usize, Vec<VertexBufferPair>>,
    shared: FxHashMap<IndexBufferKey, SharedEntry>,
    live_pairs: usize,
    pair_limit: Option<usize>,
}

impl HostBufferAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses new vertex pairs once `limit` are live.
    pub fn with_pair_limit(limit: usize) -> Self {
        Self {
            pair_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn set_pair_limit(&mut self, limit: Option<usize>) {
        self.pair_limit = limit;
    }

    /// Raw contents of a buffer, if it exists.
    pub fn buffer_contents(&self, handle: BufferHandle) -> Option<&[u8]> {
        self.buffers
            .get(&handle)
            .map(|words| bytemuck::cast_slice(words.as_slice()))
    }

    /// Indices stored in a shared index buffer.
    pub fn index_contents(&self, buffer: &SharedIndexBuffer) -> Option<&[u32]> {
        self.buffers.get(&buffer.handle).map(Vec::as_slice)
    }

    /// Vertex pairs currently handed out.
    pub fn live_vertex_pairs(&self) -> usize {
        self.live_pairs
    }

    /// Vertex pairs waiting in the pool.
    pub fn pooled_vertex_pairs(&self) -> usize {
        self.free_pairs.values().map(Vec::len).sum()
    }

    pub fn shared_index_buffer_count(&self) -> usize {
        self.shared.len()
    }

    /// Total bytes held, pooled buffers included.
    pub fn total_bytes(&self) -> usize {
        self.buffers.values().map(|words| words.len() * 4).sum()
    }

    fn create_buffer(&mut self, words: Vec<u32>) -> BufferHandle {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.buffers.insert(handle, words);
        handle
    }
}

impl TerrainBufferAllocator for HostBufferAllocator {
    fn allocate_vertex_buffers(&mut self, vertex_count: usize) -> Option<VertexBufferPair> {
        if self.pair_limit.is_some_and(|limit| self.live_pairs >= limit) {
            return None;
        }
        let pair = match self.free_pairs.get_mut(&vertex_count).and_then(Vec::pop) {
            Some(pair) => pair,
            None => {
                let positions =
                    self.create_buffer(vec![0; vertex_count * size_of::<PositionVertex>() / 4]);
                let deltas =
                    self.create_buffer(vec![0; vertex_count * size_of::<DeltaVertex>() / 4]);
                VertexBufferPair {
                    positions,
                    deltas,
                    vertex_count,
                }
            }
        };
        self.live_pairs += 1;
        Some(pair)
    }

    fn write_vertex_buffers(
        &mut self,
        pair: &VertexBufferPair,
        positions: &[PositionVertex],
        deltas: &[DeltaVertex],
    ) {
        if let Some(buf) = self.buffers.get_mut(&pair.positions) {
            let src: &[u32] = bytemuck::cast_slice(positions);
            buf[..src.len()].copy_from_slice(src);
        }
        if let Some(buf) = self.buffers.get_mut(&pair.deltas) {
            let src: &[u32] = bytemuck::cast_slice(deltas);
            buf[..src.len()].copy_from_slice(src);
        }
    }

    fn free_vertex_buffers(&mut self, pair: VertexBufferPair) {
        self.live_pairs = self.live_pairs.saturating_sub(1);
        self.free_pairs
            .entry(pair.vertex_count)
            .or_default()
            .push(pair);
    }

    fn shared_index_buffer(&mut self, key: &IndexBufferKey) -> Option<SharedIndexBuffer> {
        if let Some(entry) = self.shared.get_mut(key) {
            entry.refs += 1;
            return Some(entry.buffer);
        }
        let indices = key.generate();
        let index_count = indices.len() as u32;
        let handle = self.create_buffer(indices);
        debug!("Created shared index buffer {handle:?} for {key:?}");
        let buffer = SharedIndexBuffer {
            handle,
            index_count,
        };
        self.shared.insert(*key, SharedEntry { buffer, refs: 1 });
        Some(buffer)
    }

    fn release_index_buffer(&mut self, buffer: SharedIndexBuffer) {
        let key = self
            .shared
            .iter()
            .find(|(_, entry)| entry.buffer.handle == buffer.handle)
            .map(|(key, _)| *key);
        let Some(key) = key else {
            return;
        };
        if let Some(entry) = self.shared.get_mut(&key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                self.shared.remove(&key);
                self.buffers.remove(&buffer.handle);
            }
        }
    }
}
