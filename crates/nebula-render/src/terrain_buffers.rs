//! wgpu-backed [`TerrainBufferAllocator`].
//!
//! Vertex buffer pairs are pooled by vertex count, since records of one
//! shape are created and destroyed repeatedly as the terrain loads and
//! unloads. Index buffers are immutable once generated and shared by key.

use log::{debug, warn};
use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;

use nebula_terrain::{
    BufferHandle, DeltaVertex, IndexBufferKey, PositionVertex, SharedIndexBuffer,
    TerrainBufferAllocator, VertexBufferPair,
};

struct SharedEntry {
    buffer: SharedIndexBuffer,
    refs: usize,
}

/// Creates terrain vertex and index buffers on a wgpu device.
///
/// An optional byte budget caps total GPU memory; requests that would exceed
/// it return `None` and the terrain skips the affected nodes.
pub struct WgpuTerrainAllocator<'a> {
    device: &'a wgpu::Device,
    queue: &'a wgpu::Queue,
    next_handle: u32,
    buffers: FxHashMap<BufferHandle, wgpu::Buffer>,
    free_pairs: FxHashMap<usize, Vec<VertexBufferPair>>,
    shared: FxHashMap<IndexBufferKey, SharedEntry>,
    live_pairs: usize,
    allocated_bytes: u64,
    byte_budget: Option<u64>,
}

impl<'a> WgpuTerrainAllocator<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            next_handle: 0,
            buffers: FxHashMap::default(),
            free_pairs: FxHashMap::default(),
            shared: FxHashMap::default(),
            live_pairs: 0,
            allocated_bytes: 0,
            byte_budget: None,
        }
    }

    /// Allocator that refuses to grow past `budget` bytes.
    pub fn with_byte_budget(device: &'a wgpu::Device, queue: &'a wgpu::Queue, budget: u64) -> Self {
        Self {
            byte_budget: Some(budget),
            ..Self::new(device, queue)
        }
    }

    /// The wgpu buffer behind `handle`.
    pub fn buffer(&self, handle: BufferHandle) -> Option<&wgpu::Buffer> {
        self.buffers.get(&handle)
    }

    /// Total bytes allocated, pooled buffers included.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn live_vertex_pairs(&self) -> usize {
        self.live_pairs
    }

    pub fn pooled_vertex_pairs(&self) -> usize {
        self.free_pairs.values().map(Vec::len).sum()
    }

    pub fn shared_index_buffer_count(&self) -> usize {
        self.shared.len()
    }

    fn fits_budget(&self, bytes: u64) -> bool {
        self.byte_budget
            .is_none_or(|budget| self.allocated_bytes + bytes <= budget)
    }

    fn register(&mut self, buffer: wgpu::Buffer) -> BufferHandle {
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.allocated_bytes += buffer.size();
        self.buffers.insert(handle, buffer);
        handle
    }

    fn create_vertex_buffer(&mut self, label: &str, size: u64) -> BufferHandle {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.register(buffer)
    }
}

impl TerrainBufferAllocator for WgpuTerrainAllocator<'_> {
    fn allocate_vertex_buffers(&mut self, vertex_count: usize) -> Option<VertexBufferPair> {
        if let Some(pair) = self.free_pairs.get_mut(&vertex_count).and_then(Vec::pop) {
            self.live_pairs += 1;
            return Some(pair);
        }

        let position_bytes = (vertex_count * size_of::<PositionVertex>()) as u64;
        let delta_bytes = (vertex_count * size_of::<DeltaVertex>()) as u64;
        if !self.fits_budget(position_bytes + delta_bytes) {
            warn!(
                "Terrain vertex buffers for {vertex_count} vertices exceed the {:?} byte budget",
                self.byte_budget
            );
            return None;
        }
        let positions = self.create_vertex_buffer("terrain-positions", position_bytes);
        let deltas = self.create_vertex_buffer("terrain-deltas", delta_bytes);
        self.live_pairs += 1;
        Some(VertexBufferPair {
            positions,
            deltas,
            vertex_count,
        })
    }

    fn write_vertex_buffers(
        &mut self,
        pair: &VertexBufferPair,
        positions: &[PositionVertex],
        deltas: &[DeltaVertex],
    ) {
        if let Some(buffer) = self.buffers.get(&pair.positions) {
            self.queue
                .write_buffer(buffer, 0, bytemuck::cast_slice(positions));
        }
        if let Some(buffer) = self.buffers.get(&pair.deltas) {
            self.queue.write_buffer(buffer, 0, bytemuck::cast_slice(deltas));
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
        let bytes = (indices.len() * size_of::<u32>()) as u64;
        if !self.fits_budget(bytes) {
            warn!("Terrain index buffer for {key:?} exceeds the byte budget");
            return None;
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("terrain-indices"),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            });
        let handle = self.register(buffer);
        debug!("Created shared index buffer {handle:?} ({} indices)", indices.len());

        let buffer = SharedIndexBuffer {
            handle,
            index_count: indices.len() as u32,
        };
        self.shared.insert(*key, SharedEntry { buffer, refs: 1 });
        Some(buffer)
    }

    fn release_index_buffer(&mut self, buffer: SharedIndexBuffer) {
        let Some(key) = self
            .shared
            .iter()
            .find(|(_, entry)| entry.buffer.handle == buffer.handle)
            .map(|(key, _)| *key)
        else {
            return;
        };
        let Some(entry) = self.shared.get_mut(&key) else {
            return;
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            self.shared.remove(&key);
            if let Some(gpu) = self.buffers.remove(&buffer.handle) {
                self.allocated_bytes = self.allocated_bytes.saturating_sub(gpu.size());
                gpu.destroy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_device() -> Option<(wgpu::Device, wgpu::Queue)> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::default(),
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok()?;
            adapter
                .request_device(&wgpu::DeviceDescriptor::default())
                .await
                .ok()
        })
    }

    fn key() -> IndexBufferKey {
        IndexBufferKey {
            batch_size: 17,
            record_size: 65,
            vertex_increment: 4,
            offset_x: 0,
            offset_y: 0,
            skirt_rows_cols: 5,
            skirt_row_col_skip: 16,
        }
    }

    #[test]
    fn test_vertex_pairs_are_pooled() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut alloc = WgpuTerrainAllocator::new(&device, &queue);
        let a = alloc.allocate_vertex_buffers(100).unwrap();
        assert_eq!(alloc.allocated_bytes(), 1600);
        alloc.free_vertex_buffers(a);
        assert_eq!(alloc.pooled_vertex_pairs(), 1);

        let b = alloc.allocate_vertex_buffers(100).unwrap();
        assert_eq!(a, b, "same-sized request should reuse the pooled pair");
        assert_eq!(alloc.allocated_bytes(), 1600, "reuse must not allocate");
        assert_eq!(alloc.live_vertex_pairs(), 1);
    }

    #[test]
    fn test_budget_exhaustion_returns_none() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut alloc = WgpuTerrainAllocator::with_byte_budget(&device, &queue, 2000);
        assert!(alloc.allocate_vertex_buffers(100).is_some());
        assert!(alloc.allocate_vertex_buffers(100).is_none());
        assert!(alloc.shared_index_buffer(&key()).is_none());
    }

    #[test]
    fn test_index_buffers_shared_and_released() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut alloc = WgpuTerrainAllocator::new(&device, &queue);
        let a = alloc.shared_index_buffer(&key()).unwrap();
        let b = alloc.shared_index_buffer(&key()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.index_count as usize, nebula_terrain::index_count(17));
        assert_eq!(alloc.shared_index_buffer_count(), 1);

        alloc.release_index_buffer(a);
        assert!(alloc.buffer(a.handle).is_some(), "still referenced once");
        alloc.release_index_buffer(b);
        assert!(alloc.buffer(a.handle).is_none());
        assert_eq!(alloc.allocated_bytes(), 0);
    }

    #[test]
    fn test_write_vertex_buffers() {
        let Some((device, queue)) = test_device() else {
            return;
        };
        let mut alloc = WgpuTerrainAllocator::new(&device, &queue);
        let pair = alloc.allocate_vertex_buffers(4).unwrap();
        let positions = [PositionVertex {
            grid: [1, 2],
            height: 3.0,
        }; 4];
        let deltas = [DeltaVertex {
            delta: 0.5,
            threshold: 1.0,
        }; 4];
        alloc.write_vertex_buffers(&pair, &positions, &deltas);
        queue.submit(std::iter::empty());
        assert_eq!(alloc.buffer(pair.positions).unwrap().size(), 32);
    }
}
