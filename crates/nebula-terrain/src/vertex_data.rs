//! Vertex data records: CPU geometry, skirts and GPU buffer lifecycle.
//!
//! A record is owned by one node and covers that node's whole area at a
//! fixed resolution. Descendants down to the record's depth limit draw from
//! the same buffers with their own index buffers.
//!
//! Vertex layout: `size * size` main grid vertices in row-major order, then
//! `skirt_rows_cols` rows of `size` skirt vertices, then as many columns.

use log::{debug, info, warn};
use nebula_math::Rect;

use crate::allocator::TerrainBufferAllocator;
use crate::allocator::VertexBufferPair;
use crate::error::TerrainError;
use crate::heightfield::HeightfieldSource;
use crate::index_data::IndexBufferKey;
use crate::node::{NodeId, VertexDataLink};
use crate::quadtree::QuadTree;
use crate::settings::is_power_of_two_plus_one;

/// Packed grid position and height of one vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PositionVertex {
    /// Absolute grid column and row.
    pub grid: [u16; 2],
    pub height: f32,
}

/// Morph data of one vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DeltaVertex {
    /// Height change that moves the vertex onto the coarser surface.
    pub delta: f32,
    /// Highest global LOD at which the vertex still exists.
    pub threshold: f32,
}

static_assertions::assert_eq_size!(PositionVertex, [u8; 8]);
static_assertions::assert_eq_size!(DeltaVertex, [u8; 8]);

/// Threshold written for skirt vertices, above any real LOD so they never
/// morph.
pub const SKIRT_DELTA_THRESHOLD: f32 = 99.0;

#[derive(Debug)]
pub struct VertexDataRecord {
    resolution: u32,
    size: u32,
    tree_levels: u32,
    skirt_rows_cols: u32,
    skirt_row_col_skip: u32,
    cpu_positions: Option<Vec<PositionVertex>>,
    cpu_deltas: Option<Vec<DeltaVertex>>,
    gpu: Option<VertexBufferPair>,
    gpu_dirty: bool,
}

impl VertexDataRecord {
    /// Describe a record of `size` vertices per side sampled at
    /// `resolution`, shared by `tree_levels` levels of nodes.
    pub(crate) fn new(resolution: u32, size: u32, tree_levels: u32) -> Self {
        let skirt_rows_cols = ((1u32 << tree_levels.min(16)) + 1).min(size);
        let skirt_row_col_skip = (size - 1) / (skirt_rows_cols - 1);
        Self {
            resolution,
            size,
            tree_levels,
            skirt_rows_cols,
            skirt_row_col_skip,
            cpu_positions: None,
            cpu_deltas: None,
            gpu: None,
            gpu_dirty: false,
        }
    }

    /// Vertices per side of the whole terrain at this record's sampling.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Vertices per side of the main grid.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn tree_levels(&self) -> u32 {
        self.tree_levels
    }

    pub fn skirt_rows_cols(&self) -> u32 {
        self.skirt_rows_cols
    }

    pub fn skirt_row_col_skip(&self) -> u32 {
        self.skirt_row_col_skip
    }

    /// Main grid plus skirt vertices.
    pub fn vertex_count(&self) -> usize {
        let size = self.size as usize;
        size * size + 2 * size * self.skirt_rows_cols as usize
    }

    pub fn positions(&self) -> Option<&[PositionVertex]> {
        self.cpu_positions.as_deref()
    }

    pub fn deltas(&self) -> Option<&[DeltaVertex]> {
        self.cpu_deltas.as_deref()
    }

    pub fn has_cpu_data(&self) -> bool {
        self.cpu_positions.is_some()
    }

    pub fn gpu_buffers(&self) -> Option<VertexBufferPair> {
        self.gpu
    }

    /// `true` when CPU data changed since the last upload.
    pub fn is_dirty(&self) -> bool {
        self.gpu_dirty
    }

    fn allocate_cpu(&mut self) {
        let count = self.vertex_count();
        self.cpu_positions = Some(vec![PositionVertex::default(); count]);
        self.cpu_deltas = Some(vec![DeltaVertex::default(); count]);
    }

    fn destroy_cpu(&mut self) {
        self.gpu_dirty = false;
        self.cpu_positions = None;
        self.cpu_deltas = None;
    }

    fn upload(&mut self, pair: &VertexBufferPair, allocator: &mut dyn TerrainBufferAllocator) {
        if let (Some(positions), Some(deltas)) = (&self.cpu_positions, &self.cpu_deltas) {
            allocator.write_vertex_buffers(pair, positions, deltas);
            self.gpu_dirty = false;
        }
    }
}

/// First multiple of `step` past `origin` that is not below `value`.
fn align_up(value: u32, origin: u32, step: u32) -> u32 {
    if value <= origin {
        origin
    } else {
        origin + (value - origin).div_ceil(step) * step
    }
}

impl QuadTree {
    /// Give the nodes at `depth_start` their own records of `size` vertices
    /// per side sampled at `resolution`, generate their CPU geometry, and
    /// point every descendant above `depth_end` at them.
    pub fn assign_vertex_data(
        &mut self,
        source: &impl HeightfieldSource,
        depth_start: u32,
        depth_end: u32,
        resolution: u32,
        size: u32,
    ) -> Result<(), TerrainError> {
        let depth = self.depth();
        if depth_start >= depth_end || depth_end > depth {
            return Err(TerrainError::DepthRange {
                start: depth_start,
                end: depth_end,
                depth,
            });
        }
        let terrain_size = self.settings.size;
        if !is_power_of_two_plus_one(resolution) || resolution > terrain_size {
            return Err(TerrainError::InvalidResolution {
                resolution,
                size: terrain_size,
            });
        }
        // Nodes at `depth_start` span this many grid units; each record
        // vertex covers `stride` of them.
        let stride = (terrain_size - 1) / (resolution - 1);
        let span = (terrain_size - 1) >> depth_start;
        if span < stride {
            return Err(TerrainError::InvalidResolution {
                resolution,
                size: terrain_size,
            });
        }
        let expected = span / stride + 1;
        if size != expected {
            return Err(TerrainError::InvalidRecordSize { size, expected });
        }
        if source.settings() != &self.settings {
            return Err(TerrainError::SettingsMismatch);
        }
        self.assign_vertex_data_from(self.root(), source, depth_start, depth_end, resolution, size);
        Ok(())
    }

    fn assign_vertex_data_from(
        &mut self,
        id: NodeId,
        source: &impl HeightfieldSource,
        depth_start: u32,
        depth_end: u32,
        resolution: u32,
        size: u32,
    ) {
        let node = self.node_mut(id);
        debug_assert!(node.depth <= depth_start, "descended past depth {depth_start}");

        if node.depth == depth_start {
            let tree_levels = depth_end - depth_start;
            let reuse = node.record().is_some_and(|r| {
                r.resolution == resolution && r.size == size && r.tree_levels == tree_levels
            });
            if !reuse {
                debug_assert!(
                    node.record().is_none_or(|r| r.gpu.is_none()),
                    "replacing a record that still holds GPU buffers"
                );
                node.vertex_data =
                    VertexDataLink::Owner(Box::new(VertexDataRecord::new(resolution, size, tree_levels)));
            }
            let children = node.children;
            let depth = node.depth;

            if let Some(children) = children {
                if depth_end > depth + 1 {
                    for child in children {
                        self.use_ancestor_vertex_data(child, id, depth_end);
                    }
                }
            }
            self.create_cpu_vertex_data(id, source);
        } else if let Some(children) = node.children {
            for child in children {
                self.assign_vertex_data_from(child, source, depth_start, depth_end, resolution, size);
            }
        }
    }

    fn use_ancestor_vertex_data(&mut self, id: NodeId, owner: NodeId, depth_end: u32) {
        let node = self.node_mut(id);
        node.vertex_data = VertexDataLink::Shared(owner);
        if let Some(children) = node.children {
            if depth_end > node.depth + 1 {
                for child in children {
                    self.use_ancestor_vertex_data(child, owner, depth_end);
                }
            }
        }
    }

    /// Spread records over the tree so none exceeds `max_record_size`
    /// vertices per side.
    ///
    /// Working up from the leaves, the first depth with exactly enough nodes
    /// to cut the full-resolution grid into records that fit gets its own
    /// records. Each shallower band then looks for the depth matching a
    /// resolution halved once more, and the root always ends up owning one.
    pub fn distribute_vertex_data(
        &mut self,
        source: &impl HeightfieldSource,
        max_record_size: u32,
    ) -> Result<(), TerrainError> {
        let size = self.settings.size;
        if !is_power_of_two_plus_one(max_record_size) {
            return Err(TerrainError::InvalidResolution {
                resolution: max_record_size,
                size,
            });
        }

        let mut depth = self.depth();
        let mut prev_depth = depth;
        let mut current_resolution = size;
        let mut baked_resolution = size;
        let mut target_splits = (baked_resolution - 1) / (max_record_size - 1);

        while depth > 0 && target_splits > 0 {
            depth -= 1;
            let splits = 1u32 << depth;
            if splits == target_splits {
                let record_size = (baked_resolution - 1) / splits + 1;
                self.assign_vertex_data(source, depth, prev_depth, baked_resolution, record_size)?;
                info!(
                    "Assigned vertex data to depth {depth}..{prev_depth}: resolution {baked_resolution}, record size {record_size}"
                );
                baked_resolution = (current_resolution - 1) / 2 + 1;
                target_splits = (baked_resolution - 1) / (max_record_size - 1);
                prev_depth = depth;
            }
            current_resolution = (current_resolution - 1) / 2 + 1;
        }

        if prev_depth > 0 {
            self.assign_vertex_data(source, 0, prev_depth, baked_resolution, baked_resolution)?;
            info!(
                "Assigned vertex data to depth 0..{prev_depth}: resolution {baked_resolution}, record size {baked_resolution}"
            );
        }
        self.propagate_bounds(self.root());
        Ok(())
    }

    /// The node whose record `id` draws from, possibly `id` itself.
    pub fn vertex_data_owner(&self, id: NodeId) -> Option<NodeId> {
        match self.node(id).vertex_data {
            VertexDataLink::Owner(_) => Some(id),
            VertexDataLink::Shared(owner) => Some(owner),
            VertexDataLink::Unassigned => None,
        }
    }

    /// The record `id` draws from.
    pub fn vertex_data_record(&self, id: NodeId) -> Option<&VertexDataRecord> {
        self.vertex_data_owner(id)
            .and_then(|owner| self.node(owner).record())
    }

    /// Allocate CPU arrays for an owned record and fill them from `source`.
    pub fn create_cpu_vertex_data(&mut self, id: NodeId, source: &impl HeightfieldSource) {
        let node = self.node_mut(id);
        let rect = node.rect();
        let Some(record) = node.record_mut() else {
            return;
        };
        record.allocate_cpu();
        self.update_vertex_buffer(id, source, &rect);
    }

    /// Free the CPU arrays of an owned record.
    pub fn destroy_cpu_vertex_data(&mut self, id: NodeId) {
        if let Some(record) = self.node_mut(id).record_mut() {
            record.destroy_cpu();
        }
    }

    /// Rewrite the part of `id`'s record covering `rect`, then refresh the
    /// bounds of every node drawing from it.
    fn update_vertex_buffer(&mut self, id: NodeId, source: &impl HeightfieldSource, rect: &Rect) {
        let node = self.node_mut(id);
        let node_rect = node.rect();
        debug_assert!(node_rect.contains_rect(rect), "{rect:?} outside {node_rect:?}");
        let Some(record) = node.record_mut() else {
            return;
        };
        let (Some(positions), Some(deltas)) =
            (record.cpu_positions.as_mut(), record.cpu_deltas.as_mut())
        else {
            return;
        };

        let settings = source.settings();
        let inc = (settings.size - 1) / (record.resolution - 1);
        let (ox, oy) = (node_rect.left, node_rect.top);
        let size = record.size;
        let skirt_spacing = record.skirt_row_col_skip * inc;
        let skirt_base = (size * size) as usize;
        let skirt_size = settings.skirt_size;
        let start_x = align_up(rect.left, ox, inc);
        let start_y = align_up(rect.top, oy, inc);

        for y in (start_y..rect.bottom).step_by(inc as usize) {
            for x in (start_x..rect.right).step_by(inc as usize) {
                let i = (((y - oy) / inc) * size + (x - ox) / inc) as usize;
                positions[i] = PositionVertex {
                    grid: [x as u16, y as u16],
                    height: source.height_at(x, y),
                };
                deltas[i] = DeltaVertex {
                    delta: source.delta_at(x, y),
                    threshold: source.lod_level_when_vertex_eliminated(x, y) as f32 - 1.0,
                };
            }
        }

        let skirt = |x: u32, y: u32| {
            (
                PositionVertex {
                    grid: [x as u16, y as u16],
                    height: source.height_at(x, y) - skirt_size,
                },
                DeltaVertex {
                    delta: 0.0,
                    threshold: SKIRT_DELTA_THRESHOLD,
                },
            )
        };

        for y in (align_up(rect.top, oy, skirt_spacing)..rect.bottom).step_by(skirt_spacing as usize) {
            let row = (y - oy) / skirt_spacing;
            for x in (start_x..rect.right).step_by(inc as usize) {
                let i = skirt_base + (row * size + (x - ox) / inc) as usize;
                (positions[i], deltas[i]) = skirt(x, y);
            }
        }

        let col_base = skirt_base + (record.skirt_rows_cols * size) as usize;
        for x in (align_up(rect.left, ox, skirt_spacing)..rect.right).step_by(skirt_spacing as usize) {
            let col = (x - ox) / skirt_spacing;
            for y in (start_y..rect.bottom).step_by(inc as usize) {
                let i = col_base + (col * size + (y - oy) / inc) as usize;
                (positions[i], deltas[i]) = skirt(x, y);
            }
        }
        record.gpu_dirty = true;

        self.reset_bounds(id, id, rect);
        for y in (start_y..rect.bottom).step_by(inc as usize) {
            for x in (start_x..rect.right).step_by(inc as usize) {
                let pos = source.point(x, y, source.height_at(x, y));
                self.merge_into_bounds(id, id, x, y, pos);
            }
        }
    }

    /// Regenerate every record that overlaps `rect` and refresh bounds up
    /// the tree.
    pub fn update_vertex_data(&mut self, source: &impl HeightfieldSource, rect: &Rect) {
        self.update_vertex_data_from(self.root(), source, rect);
    }

    fn update_vertex_data_from(&mut self, id: NodeId, source: &impl HeightfieldSource, rect: &Rect) {
        let node = self.node(id);
        let Some(clipped) = node.rect().intersection(rect) else {
            return;
        };
        match node.record().map(VertexDataRecord::has_cpu_data) {
            Some(true) => self.update_vertex_buffer(id, source, &clipped),
            Some(false) => self.create_cpu_vertex_data(id, source),
            None => {}
        }

        if let Some(children) = self.node(id).children {
            for child in children {
                self.update_vertex_data_from(child, source, rect);
            }
            self.merge_child_bounds(id);
        }
    }

    /// Upload an owned record's CPU data into freshly allocated buffers and
    /// release the CPU copy.
    ///
    /// Does nothing without CPU data or when buffers already exist. If the
    /// allocator has nothing to give, the node stays without buffers.
    pub fn create_gpu_vertex_data(&mut self, id: NodeId, allocator: &mut dyn TerrainBufferAllocator) {
        let Some(record) = self.node_mut(id).record_mut() else {
            return;
        };
        if record.gpu.is_some() || !record.has_cpu_data() {
            return;
        }
        let Some(pair) = allocator.allocate_vertex_buffers(record.vertex_count()) else {
            warn!("No vertex buffers available for terrain node {}", id.index());
            return;
        };
        record.upload(&pair, allocator);
        record.gpu = Some(pair);
        record.destroy_cpu();
    }

    /// Re-upload an owned record whose CPU data changed.
    pub fn update_gpu_vertex_data(&mut self, id: NodeId, allocator: &mut dyn TerrainBufferAllocator) {
        let Some(record) = self.node_mut(id).record_mut() else {
            return;
        };
        if !record.gpu_dirty {
            return;
        }
        let gpu = record.gpu;
        match gpu {
            Some(pair) => record.upload(&pair, allocator),
            None => self.create_gpu_vertex_data(id, allocator),
        }
    }

    /// Return an owned record's buffers to the allocator.
    pub fn destroy_gpu_vertex_data(&mut self, id: NodeId, allocator: &mut dyn TerrainBufferAllocator) {
        let Some(record) = self.node_mut(id).record_mut() else {
            return;
        };
        if let Some(pair) = record.gpu.take() {
            allocator.free_vertex_buffers(pair);
        }
    }

    /// Fetch a shared index buffer for every LOD level of `id` that lacks one.
    pub fn create_gpu_index_data(&mut self, id: NodeId, allocator: &mut dyn TerrainBufferAllocator) {
        let Some(owner) = self.vertex_data_owner(id) else {
            return;
        };
        let Some(record) = self.node(owner).record() else {
            return;
        };
        let ratio = (self.settings.size - 1) / (record.resolution - 1);
        let (owner_x, owner_y) = self.node(owner).offset();
        let (record_size, rows_cols, skip) =
            (record.size, record.skirt_rows_cols, record.skirt_row_col_skip);

        let node = self.node_mut(id);
        let offset_x = (node.offset_x - owner_x) / ratio;
        let offset_y = (node.offset_y - owner_y) / ratio;
        let node_size = node.size;
        for level in &mut node.lod_levels {
            if level.index_buffer.is_some() {
                continue;
            }
            let vertex_increment = (node_size - 1) / (level.batch_size - 1) / ratio;
            debug_assert!(vertex_increment >= 1, "record too coarse for batch {}", level.batch_size);
            let key = IndexBufferKey {
                batch_size: level.batch_size,
                record_size,
                vertex_increment,
                offset_x,
                offset_y,
                skirt_rows_cols: rows_cols,
                skirt_row_col_skip: skip,
            };
            level.index_buffer = allocator.shared_index_buffer(&key);
            if level.index_buffer.is_none() {
                warn!("No index buffer available for terrain node {}", id.index());
            }
        }
    }

    /// Release every index buffer held by `id`.
    pub fn destroy_gpu_index_data(&mut self, id: NodeId, allocator: &mut dyn TerrainBufferAllocator) {
        for level in &mut self.node_mut(id).lod_levels {
            if let Some(buffer) = level.index_buffer.take() {
                allocator.release_index_buffer(buffer);
            }
        }
    }

    /// Create GPU vertex and index data for the whole tree.
    pub fn load(&mut self, allocator: &mut dyn TerrainBufferAllocator) {
        self.load_range(0, self.depth(), allocator);
    }

    /// Create GPU data for nodes with `depth_start <= depth < depth_end`.
    pub fn load_range(
        &mut self,
        depth_start: u32,
        depth_end: u32,
        allocator: &mut dyn TerrainBufferAllocator,
    ) {
        for i in 0..self.nodes.len() {
            let id = NodeId(i as u32);
            let depth = self.nodes[i].depth;
            if depth < depth_start || depth >= depth_end {
                continue;
            }
            self.create_gpu_vertex_data(id, allocator);
            self.create_gpu_index_data(id, allocator);
        }
        debug!("Loaded terrain nodes at depth {depth_start}..{depth_end}");
    }

    /// Release GPU data and drawables for the whole tree.
    pub fn unload(&mut self, allocator: &mut dyn TerrainBufferAllocator) {
        self.unload_range(0, self.depth(), allocator);
    }

    /// Release GPU data and drawables of nodes with
    /// `depth_start <= depth < depth_end`.
    pub fn unload_range(
        &mut self,
        depth_start: u32,
        depth_end: u32,
        allocator: &mut dyn TerrainBufferAllocator,
    ) {
        for i in (0..self.nodes.len()).rev() {
            let id = NodeId(i as u32);
            let depth = self.nodes[i].depth;
            if depth < depth_start || depth >= depth_end {
                continue;
            }
            self.nodes[i].entity = None;
            self.destroy_gpu_vertex_data(id, allocator);
            self.destroy_gpu_index_data(id, allocator);
        }
        debug!("Unloaded terrain nodes at depth {depth_start}..{depth_end}");
    }

    /// Regenerate CPU data of every record that has none.
    pub fn prepare(&mut self, source: &impl HeightfieldSource) {
        for i in 0..self.nodes.len() {
            let id = NodeId(i as u32);
            if self.nodes[i].record().is_some_and(|r| !r.has_cpu_data() && r.gpu.is_none()) {
                self.create_cpu_vertex_data(id, source);
            }
        }
    }

    /// Free the CPU data of every record.
    pub fn unprepare(&mut self) {
        for i in 0..self.nodes.len() {
            self.destroy_cpu_vertex_data(NodeId(i as u32));
        }
    }
}
