//! [`Terrain`]: a heightfield together with the quadtree that renders it.

use log::info;
use nebula_math::Rect;

use crate::allocator::TerrainBufferAllocator;
use crate::delta::calculate_height_deltas;
use crate::entity::{DrawList, MaterialFactory, TerrainMaterialDesc};
use crate::error::TerrainError;
use crate::heightfield::{Heightfield, HeightfieldSource};
use crate::node::NodeId;
use crate::quadtree::QuadTree;
use crate::selection::{FrameLod, LodSelectionParams};
use crate::settings::TerrainSettings;

pub struct Terrain {
    heightfield: Heightfield,
    tree: QuadTree,
    material: TerrainMaterialDesc,
    loaded: bool,
}

static_assertions::assert_impl_all!(Terrain: Send, Sync);

impl Terrain {
    /// Build the quadtree over `heightfield`, compute and publish height
    /// deltas, and distribute vertex data records no larger than
    /// `max_record_size` vertices per side.
    pub fn new(mut heightfield: Heightfield, max_record_size: u32) -> Result<Self, TerrainError> {
        let mut tree = QuadTree::build(&heightfield)?;
        let size = heightfield.settings().size;
        let full = Rect::square(0, 0, size);
        calculate_height_deltas(&mut heightfield, &mut tree, &full);
        tree.finalise_delta_values(&full);
        tree.distribute_vertex_data(&heightfield, max_record_size)?;
        heightfield.take_dirty_rect();

        info!(
            "Terrain ready: size {size}, {} nodes, height range {:?}",
            tree.node_count(),
            heightfield.height_range()
        );
        Ok(Self {
            heightfield,
            tree,
            material: TerrainMaterialDesc::default(),
            loaded: false,
        })
    }

    pub fn settings(&self) -> &TerrainSettings {
        self.heightfield.settings()
    }

    pub fn heightfield(&self) -> &Heightfield {
        &self.heightfield
    }

    pub fn quad_tree(&self) -> &QuadTree {
        &self.tree
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Textures used by entities created from now on.
    pub fn set_material(&mut self, desc: TerrainMaterialDesc) {
        self.material = desc;
    }

    pub fn material(&self) -> &TerrainMaterialDesc {
        &self.material
    }

    /// Regenerate missing CPU data, then upload everything.
    pub fn load(&mut self, allocator: &mut dyn TerrainBufferAllocator) {
        self.tree.prepare(&self.heightfield);
        self.tree.load(allocator);
        self.loaded = true;
    }

    pub fn unload(&mut self, allocator: &mut dyn TerrainBufferAllocator) {
        self.tree.unload(allocator);
        self.loaded = false;
    }

    /// Free CPU geometry. Records are regenerated on the next [`Self::load`].
    pub fn unprepare(&mut self) {
        self.tree.unprepare();
    }

    /// # Panics
    ///
    /// Panics if `(x, y)` lies outside the heightfield.
    pub fn set_height(&mut self, x: u32, y: u32, height: f32) {
        self.heightfield.set_height(x, y, height);
    }

    pub fn height_at(&self, x: u32, y: u32) -> f32 {
        self.heightfield.height_at(x, y)
    }

    /// Apply pending height edits: recompute and publish deltas over the
    /// edited area, regenerate the affected geometry and, while loaded,
    /// re-upload it. Returns the area whose geometry was rebuilt.
    pub fn update_dirty(&mut self, allocator: &mut dyn TerrainBufferAllocator) -> Option<Rect> {
        let dirty = self.heightfield.take_dirty_rect()?;
        let settings = self.heightfield.settings();
        let size = settings.size;
        // Morph deltas change up to one coarsest quad away from an edit.
        let spread = 1u32 << (settings.num_lod_levels() - 1);

        let region = calculate_height_deltas(&mut self.heightfield, &mut self.tree, &dirty);
        self.tree.finalise_delta_values(&region);

        let affected = Rect::new(
            region.left.saturating_sub(spread),
            region.top.saturating_sub(spread),
            region.right + spread,
            region.bottom + spread,
        )
        .clamped(size);
        self.tree.update_vertex_data(&self.heightfield, &affected);

        if self.loaded {
            let owners: Vec<NodeId> = self
                .tree
                .iter()
                .filter(|(_, node)| node.owns_vertex_data() && node.rect().intersects(&affected))
                .map(|(id, _)| id)
                .collect();
            for id in owners {
                self.tree.update_gpu_vertex_data(id, allocator);
            }
        }
        Some(affected)
    }

    /// Select LODs for this frame, create missing entities and collect the
    /// draws.
    pub fn update(
        &mut self,
        params: &LodSelectionParams,
        materials: &mut dyn MaterialFactory,
    ) -> (FrameLod, DrawList) {
        let frame = self.tree.calculate_current_lod(params);
        self.tree.create_entities(&frame, materials, &self.material);
        let draws = self.tree.render(&frame);
        (frame, draws)
    }

    pub fn set_wireframe(&self, materials: &mut dyn MaterialFactory, enabled: bool) {
        self.tree.set_wireframe(materials, enabled);
    }
}
