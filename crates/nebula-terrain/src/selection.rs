//! Per-frame LOD selection.
//!
//! Children decide before their parent. A parent renders only when none of
//! its children do; when some but not all children render, the rest are
//! pinned to their coarsest level so no gap opens between siblings.

use glam::Vec3;
use log::debug;
use nebula_lod::{ErrorCoefficient, LodMorph, morph_blend};

use crate::node::{NodeId, NodeLodState};
use crate::quadtree::QuadTree;

/// Inputs to one selection pass.
#[derive(Clone, Copy, Debug)]
pub struct LodSelectionParams {
    /// Camera position in world space.
    pub camera_position: Vec3,
    pub error_coefficient: ErrorCoefficient,
    /// Compute morph blends. Without it every node renders unmorphed.
    pub enable_morph: bool,
}

/// A node chosen for drawing and how.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderedNode {
    pub node: NodeId,
    /// Index into the node's own LOD ladder.
    pub lod: usize,
    pub morph: LodMorph,
}

/// Result of one selection pass, in depth-first order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameLod {
    pub rendered: Vec<RenderedNode>,
    /// Recompute epoch the transition distances were taken from.
    pub epoch: u64,
}

impl FrameLod {
    pub fn get(&self, node: NodeId) -> Option<&RenderedNode> {
        self.rendered.iter().find(|r| r.node == node)
    }

    pub fn len(&self) -> usize {
        self.rendered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.is_empty()
    }
}

impl QuadTree {
    /// Choose which nodes render this frame and at which level.
    pub fn calculate_current_lod(&mut self, params: &LodSelectionParams) -> FrameLod {
        let epoch = self.epoch.observe(params.error_coefficient);
        for node in &mut self.nodes {
            node.current_lod = None;
            node.lod_transition = 0.0;
            node.lod_state = NodeLodState::NotEvaluated;
        }
        self.select_node(self.root(), params, epoch);

        let mut frame = FrameLod {
            rendered: Vec::new(),
            epoch,
        };
        self.collect_rendered(self.root(), &mut frame.rendered);
        debug!("LOD selection: {} nodes rendered (epoch {epoch})", frame.len());
        frame
    }

    /// Drop every cached transition distance.
    pub fn invalidate_transition_distances(&mut self) {
        self.epoch.invalidate();
    }

    /// Returns `true` when this node or a descendant renders.
    fn select_node(&mut self, id: NodeId, params: &LodSelectionParams, epoch: u64) -> bool {
        let mut rendered_children = 0;
        let children = self.node(id).children;
        if let Some(children) = children {
            for child in children {
                if self.select_node(child, params, epoch) {
                    rendered_children += 1;
                }
            }
        }

        if rendered_children > 0 {
            let node = self.node_mut(id);
            node.lod_state = NodeLodState::ChildRendered;
            if rendered_children < 4 {
                if let Some(children) = children {
                    for child in children {
                        let child_node = self.node_mut(child);
                        if !child_node.is_self_or_child_rendered() {
                            child_node.current_lod = Some(child_node.lod_count() - 1);
                            child_node.lod_transition = 1.0;
                            child_node.lod_state = NodeLodState::ForcedCoarsest;
                        }
                    }
                }
            }
            return true;
        }

        let node = self.node(id);
        let is_root = node.parent.is_none();
        let lod_count = node.lod_count();
        let to_camera = params.camera_position - node.local_centre - self.settings.position;
        let distance = (to_camera.length() - node.bounding_radius * 0.5).max(0.0);

        for lod in 0..lod_count {
            let coarsest = lod + 1 == lod_count;
            if coarsest && is_root {
                let node = self.node_mut(id);
                node.current_lod = Some(lod);
                node.lod_transition = 0.0;
                node.lod_state = NodeLodState::SelfRendered;
                return true;
            }

            let transition = self.transition_distance(id, lod, epoch, params.error_coefficient);
            if distance < transition {
                let blend = if params.enable_morph {
                    let finer = self.finer_transition_distance(id, lod, epoch, params.error_coefficient);
                    morph_blend(distance, transition, finer)
                } else {
                    0.0
                };
                let node = self.node_mut(id);
                node.current_lod = Some(lod);
                node.lod_transition = blend;
                node.lod_state = NodeLodState::SelfRendered;
                return true;
            }
        }

        self.node_mut(id).lod_state = NodeLodState::Hidden;
        false
    }

    fn transition_distance(
        &mut self,
        id: NodeId,
        lod: usize,
        epoch: u64,
        coefficient: ErrorCoefficient,
    ) -> f32 {
        let level = &mut self.node_mut(id).lod_levels[lod];
        let delta = level.max_height_delta;
        level.transition.get_or_compute(epoch, coefficient, delta)
    }

    /// Distance at which the next finer geometry hands over to `lod`: the
    /// previous ladder rung for leaves, the most demanding child's coarsest
    /// level otherwise.
    fn finer_transition_distance(
        &mut self,
        id: NodeId,
        lod: usize,
        epoch: u64,
        coefficient: ErrorCoefficient,
    ) -> f32 {
        let node = self.node(id);
        let (is_leaf, max_child) = (node.is_leaf(), node.child_with_max_height_delta);
        if is_leaf {
            return if lod > 0 {
                self.transition_distance(id, lod - 1, epoch, coefficient)
            } else {
                0.0
            };
        }
        match max_child {
            Some(child) => {
                let coarsest = self.node(child).lod_count() - 1;
                self.transition_distance(child, coarsest, epoch, coefficient)
            }
            None => 0.0,
        }
    }

    fn collect_rendered(&self, id: NodeId, out: &mut Vec<RenderedNode>) {
        let node = self.node(id);
        if let Some(lod) = node.current_lod {
            out.push(RenderedNode {
                node: id,
                lod,
                morph: LodMorph::new(node.lod_transition, lod, node.base_lod),
            });
        }
        if let Some(children) = node.children {
            for child in children {
                self.collect_rendered(child, out);
            }
        }
    }
}
