//! Drawable entities and the per-frame draw list.
//!
//! An entity is created the first time its node is selected and lives until
//! the node is unloaded. It carries only the material and placement; vertex
//! and index buffers are looked up at draw time so a node never draws from
//! buffers that were returned to the allocator.

use glam::Vec3;
use log::{debug, warn};
use nebula_lod::LodMorph;
use rustc_hash::FxHashMap;

use crate::allocator::{SharedIndexBuffer, VertexBufferPair};
use crate::node::NodeId;
use crate::quadtree::QuadTree;
use crate::selection::{FrameLod, RenderedNode};

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

/// Opaque texture handle owned by the rendering backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// One detail layer blended over the terrain.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainLayer {
    pub diffuse_specular: TextureId,
    pub normal_height: Option<TextureId>,
    /// World-space size covered by one repeat of the layer textures.
    pub world_size: f32,
}

/// Textures every terrain node material references.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TerrainMaterialDesc {
    pub normal_map: Option<TextureId>,
    /// Blend weights for layers `1..`, packed four per texture.
    pub blend_maps: Vec<TextureId>,
    pub layers: Vec<TerrainLayer>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u32);

/// Backend hook for building terrain materials.
pub trait MaterialFactory {
    fn create_material(&mut self, name: &str, desc: &TerrainMaterialDesc) -> MaterialId;

    fn set_wireframe(&mut self, material: MaterialId, enabled: bool);
}

/// Host-side material store, used headless and in tests.
#[derive(Debug, Default)]
pub struct MaterialLibrary {
    materials: Vec<(String, TerrainMaterialDesc, bool)>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn name(&self, id: MaterialId) -> Option<&str> {
        self.materials.get(id.0 as usize).map(|(name, _, _)| name.as_str())
    }

    pub fn desc(&self, id: MaterialId) -> Option<&TerrainMaterialDesc> {
        self.materials.get(id.0 as usize).map(|(_, desc, _)| desc)
    }

    pub fn is_wireframe(&self, id: MaterialId) -> bool {
        self.materials.get(id.0 as usize).is_some_and(|(_, _, wire)| *wire)
    }
}

impl MaterialFactory for MaterialLibrary {
    fn create_material(&mut self, name: &str, desc: &TerrainMaterialDesc) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push((name.to_owned(), desc.clone(), false));
        id
    }

    fn set_wireframe(&mut self, material: MaterialId, enabled: bool) {
        match self.materials.get_mut(material.0 as usize) {
            Some((_, _, wire)) => *wire = enabled,
            None => warn!("set_wireframe on unknown material {}", material.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities and draws
// ---------------------------------------------------------------------------

/// Drawable bound to one quadtree node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainEntity {
    pub material: MaterialId,
    /// World position of the terrain origin the geometry is relative to.
    pub position: Vec3,
}

/// Everything a backend needs to issue one triangle-strip draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCommand {
    pub node: NodeId,
    pub material: MaterialId,
    pub position: Vec3,
    pub vertex_buffers: VertexBufferPair,
    pub index_buffer: SharedIndexBuffer,
    pub morph: LodMorph,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawList {
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands.iter()
    }
}

impl QuadTree {
    /// Create entities for every node selected in `frame` that has none yet.
    ///
    /// Nodes whose record has no GPU buffers are skipped and retried on a
    /// later frame.
    pub fn create_entities(
        &mut self,
        frame: &FrameLod,
        materials: &mut dyn MaterialFactory,
        desc: &TerrainMaterialDesc,
    ) {
        let mut created = 0;
        for rendered in &frame.rendered {
            let id = rendered.node;
            if self.node(id).entity.is_some() {
                continue;
            }
            let has_buffers = self
                .vertex_data_record(id)
                .is_some_and(|record| record.gpu_buffers().is_some());
            if !has_buffers {
                continue;
            }
            let material = materials.create_material(&format!("terrain_node_{}", id.index()), desc);
            let position = self.settings.position;
            self.node_mut(id).entity = Some(TerrainEntity { material, position });
            created += 1;
        }
        if created > 0 {
            debug!("Created {created} terrain entities");
        }
    }

    /// Collect draws for `frame`, visiting every node depth first.
    pub fn render(&self, frame: &FrameLod) -> DrawList {
        let selected: FxHashMap<NodeId, &RenderedNode> =
            frame.rendered.iter().map(|r| (r.node, r)).collect();
        let mut list = DrawList::default();
        self.render_node(self.root(), &selected, &mut list);
        list
    }

    fn render_node(
        &self,
        id: NodeId,
        selected: &FxHashMap<NodeId, &RenderedNode>,
        list: &mut DrawList,
    ) {
        let node = self.node(id);
        if let (Some(rendered), Some(entity)) = (selected.get(&id), node.entity.as_ref()) {
            let vertex_buffers = self.vertex_data_record(id).and_then(|r| r.gpu_buffers());
            let index_buffer = node
                .lod_levels
                .get(rendered.lod)
                .and_then(|level| level.index_buffer);
            if let (Some(vertex_buffers), Some(index_buffer)) = (vertex_buffers, index_buffer) {
                list.commands.push(DrawCommand {
                    node: id,
                    material: entity.material,
                    position: entity.position,
                    vertex_buffers,
                    index_buffer,
                    morph: rendered.morph,
                });
            }
        }
        if let Some(children) = node.children {
            for child in children {
                self.render_node(child, selected, list);
            }
        }
    }

    /// Toggle wireframe on every existing entity's material.
    pub fn set_wireframe(&self, materials: &mut dyn MaterialFactory, enabled: bool) {
        for (_, node) in self.iter() {
            if let Some(entity) = &node.entity {
                materials.set_wireframe(entity.material, enabled);
            }
        }
    }
}
