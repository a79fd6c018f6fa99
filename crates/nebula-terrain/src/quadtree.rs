//! Arena-backed terrain quadtree.
//!
//! Node 0 is the root. Children always come in fours and overlap their
//! siblings by one grid column or row so shared edges use the same vertices.

use glam::Vec3;
use log::info;
use nebula_lod::LodEpoch;
use nebula_math::{Aabb, Rect};

use crate::error::TerrainError;
use crate::heightfield::HeightfieldSource;
use crate::lod_level::LodLevel;
use crate::node::{NodeId, NodeLodState, QuadTreeNode, VertexDataLink};
use crate::settings::TerrainSettings;

pub struct QuadTree {
    pub(crate) nodes: Vec<QuadTreeNode>,
    pub(crate) settings: TerrainSettings,
    pub(crate) epoch: LodEpoch,
}

static_assertions::assert_impl_all!(QuadTree: Send, Sync);

impl QuadTree {
    /// Partition the terrain described by `source` down to leaves of
    /// `max_batch_size` vertices per side.
    pub fn build(source: &impl HeightfieldSource) -> Result<Self, TerrainError> {
        let settings = source.settings().clone();
        settings.validate()?;

        let mut tree = Self {
            nodes: Vec::new(),
            settings,
            epoch: LodEpoch::new(),
        };
        let root_lod = tree.settings.num_lod_levels() - 1;
        let size = tree.settings.size;
        tree.create_node(source, None, 0, 0, size, root_lod, 0, 0);

        info!(
            "Built terrain quadtree: {} nodes, depth {}, {} LOD levels ({} per leaf)",
            tree.nodes.len(),
            tree.settings.tree_depth(),
            tree.settings.num_lod_levels(),
            tree.settings.num_lod_levels_per_leaf()
        );
        Ok(tree)
    }

    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &mut self,
        source: &impl HeightfieldSource,
        parent: Option<NodeId>,
        offset_x: u32,
        offset_y: u32,
        size: u32,
        lod: u32,
        depth: u32,
        quadrant: u8,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let split = self.settings.max_batch_size < size;

        let (base_lod, lod_levels) = if split {
            (lod, vec![LodLevel::new(self.settings.min_batch_size)])
        } else {
            let per_leaf = self.settings.num_lod_levels_per_leaf();
            debug_assert_eq!(
                lod,
                per_leaf - 1,
                "leaf at depth {depth} reached with LOD {lod}"
            );
            let mut ladder = Vec::with_capacity(per_leaf as usize);
            let mut batch = self.settings.max_batch_size;
            for _ in 0..per_leaf {
                ladder.push(LodLevel::new(batch));
                batch = (batch - 1) / 2 + 1;
            }
            debug_assert_eq!(
                ladder.last().map(LodLevel::batch_size),
                Some(self.settings.min_batch_size)
            );
            (0, ladder)
        };

        let mid = (size - 1) / 2;
        let local_centre = source.point(offset_x + mid, offset_y + mid, 0.0);

        self.nodes.push(QuadTreeNode {
            offset_x,
            offset_y,
            size,
            base_lod,
            depth,
            quadrant,
            parent,
            children: None,
            lod_levels,
            vertex_data: VertexDataLink::Unassigned,
            local_centre,
            aabb: Aabb::NULL,
            bounding_radius: 0.0,
            child_with_max_height_delta: None,
            current_lod: None,
            lod_transition: 0.0,
            lod_state: NodeLodState::NotEvaluated,
            entity: None,
        });

        if split {
            let child_size = (size - 1) / 2 + 1;
            let step = child_size - 1;
            let child_lod = lod - 1;
            let children = [
                (offset_x, offset_y),
                (offset_x + step, offset_y),
                (offset_x, offset_y + step),
                (offset_x + step, offset_y + step),
            ]
            .into_iter()
            .enumerate()
            .map(|(quadrant, (x, y))| {
                self.create_node(
                    source,
                    Some(id),
                    x,
                    y,
                    child_size,
                    child_lod,
                    depth + 1,
                    quadrant as u8,
                )
            })
            .collect::<Vec<_>>();
            self.nodes[id.index()].children = Some([children[0], children[1], children[2], children[3]]);
        }
        id
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    /// Number of node levels, root included.
    pub fn depth(&self) -> u32 {
        self.settings.tree_depth()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> &QuadTreeNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut QuadTreeNode {
        &mut self.nodes[id.index()]
    }

    /// Every node with its id, in creation (depth-first) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &QuadTreeNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    pub fn leaves(&self) -> impl Iterator<Item = (NodeId, &QuadTreeNode)> {
        self.iter().filter(|(_, node)| node.is_leaf())
    }

    pub fn nodes_at_depth(&self, depth: u32) -> impl Iterator<Item = (NodeId, &QuadTreeNode)> {
        self.iter().filter(move |(_, node)| node.depth == depth)
    }

    /// Deepest node whose area contains grid point `(x, y)`.
    pub fn find_leaf(&self, x: u32, y: u32) -> Option<NodeId> {
        let root = self.root();
        if !self.node(root).contains_point(x, y) {
            return None;
        }
        let mut current = root;
        while let Some(children) = self.node(current).children {
            current = children
                .into_iter()
                .find(|&child| self.node(child).contains_point(x, y))?;
        }
        Some(current)
    }

    /// Lowest point of the node's geometry along the height axis, relative
    /// to its local centre.
    pub fn min_height(&self, id: NodeId) -> f32 {
        let node = self.node(id);
        if node.aabb.is_null() {
            return 0.0;
        }
        self.settings.height_component(node.aabb.min)
    }

    pub fn max_height(&self, id: NodeId) -> f32 {
        let node = self.node(id);
        if node.aabb.is_null() {
            return 0.0;
        }
        self.settings.height_component(node.aabb.max)
    }

    /// Grow the bounds of `id` and every descendant drawing from `owner`'s
    /// record that contains `(x, y)` by the world point `pos`.
    pub(crate) fn merge_into_bounds(&mut self, id: NodeId, owner: NodeId, x: u32, y: u32, pos: Vec3) {
        if self.vertex_data_owner(id) != Some(owner) {
            return;
        }
        let node = self.node_mut(id);
        if !node.contains_point(x, y) {
            return;
        }
        let local = pos - node.local_centre;
        node.aabb.merge_point(local);
        node.bounding_radius = node.bounding_radius.max(local.length());
        if let Some(children) = node.children {
            for child in children {
                self.merge_into_bounds(child, owner, x, y, pos);
            }
        }
    }

    /// Clear the bounds of every node inside `rect` that draws from
    /// `owner`'s record.
    pub(crate) fn reset_bounds(&mut self, id: NodeId, owner: NodeId, rect: &Rect) {
        if self.vertex_data_owner(id) != Some(owner) {
            return;
        }
        let node = self.node_mut(id);
        if rect.contains_rect(&node.rect()) {
            node.aabb.set_null();
            node.bounding_radius = 0.0;
        }
        if let Some(children) = node.children {
            for child in children {
                self.reset_bounds(child, owner, rect);
            }
        }
    }

    /// Grow the bounds of `id` to enclose those of its direct children.
    pub(crate) fn merge_child_bounds(&mut self, id: NodeId) {
        let Some(children) = self.node(id).children else {
            return;
        };
        let centre = self.node(id).local_centre;
        for child in children {
            let child_node = self.node(child);
            let offset = child_node.local_centre - centre;
            let child_box = child_node.aabb.translated(offset);
            let reach = if child_node.aabb.is_null() {
                0.0
            } else {
                child_node.bounding_radius + offset.length()
            };
            let node = self.node_mut(id);
            node.aabb.merge(&child_box);
            node.bounding_radius = node.bounding_radius.max(reach);
        }
    }

    /// Merge child bounds into every ancestor, bottom-up.
    pub(crate) fn propagate_bounds(&mut self, id: NodeId) {
        if let Some(children) = self.node(id).children {
            for child in children {
                self.propagate_bounds(child);
            }
            self.merge_child_bounds(id);
        }
    }
}
