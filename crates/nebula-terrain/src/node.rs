//! Quadtree node storage.

use glam::Vec3;
use nebula_math::{Aabb, Rect};

use crate::entity::TerrainEntity;
use crate::lod_level::LodLevel;
use crate::vertex_data::VertexDataRecord;

/// Index of a node in its [`QuadTree`](crate::QuadTree) arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub const ROOT: Self = Self(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Outcome of the most recent LOD selection for a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeLodState {
    /// Selection has not reached this node since the last reset.
    #[default]
    NotEvaluated,
    /// Neither the node nor any descendant renders.
    Hidden,
    /// Renders itself at a level chosen by distance.
    SelfRendered,
    /// One or more descendants render in its place.
    ChildRendered,
    /// Renders at its coarsest level to cover for a rendering sibling.
    ForcedCoarsest,
}

/// How a node reaches its vertex data.
///
/// Only an owner frees the record; shared links are lookups into the owner.
#[derive(Debug, Default)]
pub(crate) enum VertexDataLink {
    #[default]
    Unassigned,
    Owner(Box<VertexDataRecord>),
    Shared(NodeId),
}

#[derive(Debug)]
pub struct QuadTreeNode {
    pub(crate) offset_x: u32,
    pub(crate) offset_y: u32,
    pub(crate) size: u32,
    pub(crate) base_lod: u32,
    pub(crate) depth: u32,
    pub(crate) quadrant: u8,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<[NodeId; 4]>,
    pub(crate) lod_levels: Vec<LodLevel>,
    pub(crate) vertex_data: VertexDataLink,
    pub(crate) local_centre: Vec3,
    pub(crate) aabb: Aabb,
    pub(crate) bounding_radius: f32,
    pub(crate) child_with_max_height_delta: Option<NodeId>,
    pub(crate) current_lod: Option<usize>,
    pub(crate) lod_transition: f32,
    pub(crate) lod_state: NodeLodState,
    pub(crate) entity: Option<TerrainEntity>,
}

impl QuadTreeNode {
    /// Grid coordinates of the top-left vertex.
    pub fn offset(&self) -> (u32, u32) {
        (self.offset_x, self.offset_y)
    }

    /// One past the last covered vertex on each axis.
    pub fn boundary(&self) -> (u32, u32) {
        (self.offset_x + self.size, self.offset_y + self.size)
    }

    /// Vertices per side covered at full resolution.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Global LOD index of this node's finest level.
    pub fn base_lod(&self) -> u32 {
        self.base_lod
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Position among its siblings, 0..4 in row-major order.
    pub fn quadrant(&self) -> u8 {
        self.quadrant
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> Option<[NodeId; 4]> {
        self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Grid rectangle covered, shared edges included.
    pub fn rect(&self) -> Rect {
        Rect::square(self.offset_x, self.offset_y, self.size)
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        self.rect().contains_point(x, y)
    }

    pub fn lod_count(&self) -> usize {
        self.lod_levels.len()
    }

    pub fn lod_levels(&self) -> &[LodLevel] {
        &self.lod_levels
    }

    /// # Panics
    ///
    /// Panics if `lod` is not below [`Self::lod_count`].
    pub fn lod_level(&self, lod: usize) -> &LodLevel {
        &self.lod_levels[lod]
    }

    /// `true` when `lod` is a global LOD index covered by this node's ladder.
    pub fn handles_global_lod(&self, lod: u32) -> bool {
        lod >= self.base_lod && ((lod - self.base_lod) as usize) < self.lod_levels.len()
    }

    /// Centre of the node at height zero, relative to the terrain origin.
    pub fn local_centre(&self) -> Vec3 {
        self.local_centre
    }

    /// Bounds of the generated geometry, relative to [`Self::local_centre`].
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    pub fn bounding_radius(&self) -> f32 {
        self.bounding_radius
    }

    /// Child whose coarsest level carried the largest height delta in the
    /// last consolidation.
    pub fn child_with_max_height_delta(&self) -> Option<NodeId> {
        self.child_with_max_height_delta
    }

    /// Ladder index rendered this frame, if any.
    pub fn current_lod(&self) -> Option<usize> {
        self.current_lod
    }

    pub fn lod_transition(&self) -> f32 {
        self.lod_transition
    }

    pub fn lod_state(&self) -> NodeLodState {
        self.lod_state
    }

    pub fn is_rendered(&self) -> bool {
        self.current_lod.is_some()
    }

    /// `true` if this node or any descendant renders this frame.
    pub fn is_self_or_child_rendered(&self) -> bool {
        matches!(
            self.lod_state,
            NodeLodState::SelfRendered | NodeLodState::ChildRendered | NodeLodState::ForcedCoarsest
        )
    }

    /// `true` if this node owns a vertex data record.
    pub fn owns_vertex_data(&self) -> bool {
        matches!(self.vertex_data, VertexDataLink::Owner(_))
    }

    pub fn entity(&self) -> Option<&TerrainEntity> {
        self.entity.as_ref()
    }

    pub(crate) fn record(&self) -> Option<&VertexDataRecord> {
        match &self.vertex_data {
            VertexDataLink::Owner(record) => Some(&**record),
            _ => None,
        }
    }

    pub(crate) fn record_mut(&mut self) -> Option<&mut VertexDataRecord> {
        match &mut self.vertex_data {
            VertexDataLink::Owner(record) => Some(&mut **record),
            _ => None,
        }
    }
}
