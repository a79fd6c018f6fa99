//! Height delta calculation.
//!
//! A pass runs in four phases. [`QuadTree::pre_delta_calculation`] clears the
//! staging thresholds of nodes a region fully covers,
//! [`QuadTree::notify_delta`] accumulates per-sample errors,
//! [`QuadTree::post_delta_calculation`] enforces the margins between levels,
//! and [`QuadTree::finalise_delta_values`] publishes the staging values to the
//! thresholds selection reads. Until the last phase runs, selection keeps
//! using the previous thresholds.

use log::debug;
use nebula_math::Rect;

use crate::heightfield::{Heightfield, HeightfieldSource};
use crate::node::NodeId;
use crate::quadtree::QuadTree;

/// Minimum ratio between a level's threshold and the one it hands over to.
pub const DELTA_MARGIN: f32 = 1.05;

impl QuadTree {
    /// Zero staging deltas of every node fully inside `rect`.
    pub fn pre_delta_calculation(&mut self, rect: &Rect) {
        self.pre_delta_from(self.root(), rect);
    }

    fn pre_delta_from(&mut self, id: NodeId, rect: &Rect) {
        let node = self.node_mut(id);
        let node_rect = node.rect();
        if !rect.intersects(&node_rect) {
            return;
        }
        if rect.contains_rect(&node_rect) {
            for level in &mut node.lod_levels {
                level.staging_height_delta = 0.0;
            }
        }
        if let Some(children) = node.children {
            for child in children {
                self.pre_delta_from(child, rect);
            }
        }
    }

    /// Record that sample `(x, y)` deviates by `delta` when rendered at
    /// global LOD `lod`.
    pub fn notify_delta(&mut self, x: u32, y: u32, lod: u32, delta: f32) {
        self.notify_delta_from(self.root(), x, y, lod, delta);
    }

    fn notify_delta_from(&mut self, id: NodeId, x: u32, y: u32, lod: u32, delta: f32) {
        let node = self.node_mut(id);
        if !node.contains_point(x, y) {
            return;
        }
        if node.handles_global_lod(lod) {
            let level = &mut node.lod_levels[(lod - node.base_lod) as usize];
            level.staging_height_delta = level.staging_height_delta.max(delta);
        }
        if let Some(children) = node.children {
            for child in children {
                self.notify_delta_from(child, x, y, lod, delta);
            }
        }
    }

    /// Enforce [`DELTA_MARGIN`] bottom-up over every node touching `rect`.
    pub fn post_delta_calculation(&mut self, rect: &Rect) {
        self.post_delta_from(self.root(), rect);
    }

    fn post_delta_from(&mut self, id: NodeId, rect: &Rect) {
        let node = self.node(id);
        if !rect.intersects(&node.rect()) {
            return;
        }
        match node.children {
            Some(children) => {
                for child in children {
                    self.post_delta_from(child, rect);
                }

                let mut max_child_delta = -1.0f32;
                let mut max_child = None;
                for child in children {
                    let child_node = self.node(child);
                    let coarsest = child_node.lod_levels[child_node.lod_count() - 1].staging_height_delta;
                    if coarsest > max_child_delta {
                        max_child_delta = coarsest;
                        max_child = Some(child);
                    }
                }

                let node = self.node_mut(id);
                let level = &mut node.lod_levels[0];
                level.staging_height_delta =
                    level.staging_height_delta.max(max_child_delta * DELTA_MARGIN);
                node.child_with_max_height_delta = max_child;
            }
            None => {
                let levels = &mut self.node_mut(id).lod_levels;
                for i in 1..levels.len() {
                    let floor = levels[i - 1].staging_height_delta * DELTA_MARGIN;
                    let level = &mut levels[i];
                    level.staging_height_delta = level.staging_height_delta.max(floor);
                }
            }
        }
    }

    /// Copy staging deltas into the active thresholds for every node touching
    /// `rect` and drop their cached transition distances.
    pub fn finalise_delta_values(&mut self, rect: &Rect) {
        self.finalise_from(self.root(), rect);
    }

    fn finalise_from(&mut self, id: NodeId, rect: &Rect) {
        let node = self.node(id);
        if !rect.intersects(&node.rect()) {
            return;
        }
        if let Some(children) = node.children {
            for child in children {
                self.finalise_from(child, rect);
            }
        }
        for level in &mut self.node_mut(id).lod_levels {
            level.max_height_delta = level.staging_height_delta;
            level.transition.invalidate();
        }
    }
}

/// Run the reset, accumulate and consolidate phases over `rect`.
///
/// For every global LOD `t` below the coarsest, each quad of spacing
/// `2^(t+1)` touching `rect` is split into two triangles and every interior
/// sample is compared against the interpolated surface. The absolute error
/// feeds [`QuadTree::notify_delta`]; the signed error of a vertex that
/// disappears exactly at `t + 1` is stored as its morph delta.
///
/// Finalising is left to the caller so the new thresholds can be published
/// at a convenient time. Returns the clamped region that was processed.
pub fn calculate_height_deltas(field: &mut Heightfield, tree: &mut QuadTree, rect: &Rect) -> Rect {
    let size = field.settings().size;
    let region = rect.clamped(size);
    if region.is_empty() {
        return region;
    }
    tree.pre_delta_calculation(&region);

    let last = size - 1;
    let mut max_delta = 0.0f32;
    for target_lod in 0..field.settings().num_lod_levels() - 1 {
        let step = 1u32 << (target_lod + 1);
        // Quads whose far edge lies on the region's first row or column
        // interpolate from it too.
        let left = region.left.saturating_sub(1) / step * step;
        let top = region.top.saturating_sub(1) / step * step;
        let right = region.right.min(last);
        let bottom = region.bottom.min(last);

        let mut y = top;
        while y < bottom {
            let mut x = left;
            while x < right {
                let d = process_quad(field, tree, x, y, step, target_lod);
                max_delta = max_delta.max(d);
                x += step;
            }
            y += step;
        }
    }

    tree.post_delta_calculation(&region);
    debug!("Height delta pass over {region:?}: max delta {max_delta}");
    region
}

/// Compare the interior samples of one quad against its two triangles.
/// Returns the largest absolute error.
fn process_quad(
    field: &mut Heightfield,
    tree: &mut QuadTree,
    x0: u32,
    y0: u32,
    step: u32,
    target_lod: u32,
) -> f32 {
    let h00 = field.height_at(x0, y0);
    let h10 = field.height_at(x0 + step, y0);
    let h01 = field.height_at(x0, y0 + step);
    let h11 = field.height_at(x0 + step, y0 + step);
    let inv = 1.0 / step as f32;

    let mut max_delta = 0.0f32;
    for fy in 0..=step {
        for fx in 0..=step {
            if fx % step == 0 && fy % step == 0 {
                continue;
            }
            let u = fx as f32 * inv;
            let v = fy as f32 * inv;
            // Split along the anti-diagonal from (1, 0) to (0, 1).
            let interpolated = if u + v <= 1.0 {
                h00 + (h10 - h00) * u + (h01 - h00) * v
            } else {
                h11 + (h01 - h11) * (1.0 - u) + (h10 - h11) * (1.0 - v)
            };
            let (x, y) = (x0 + fx, y0 + fy);
            let delta = interpolated - field.height_at(x, y);
            tree.notify_delta(x, y, target_lod, delta.abs());
            if field.lod_level_when_vertex_eliminated(x, y) == target_lod + 1 {
                field.set_delta(x, y, delta);
            }
            max_delta = max_delta.max(delta.abs());
        }
    }
    max_delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::TerrainSettings;

    fn settings() -> TerrainSettings {
        TerrainSettings {
            size: 129,
            world_size: 1280.0,
            max_batch_size: 33,
            min_batch_size: 17,
            ..Default::default()
        }
    }

    fn bumpy() -> Heightfield {
        Heightfield::from_fn(settings(), |x, y| {
            ((x as f32 * 0.37).sin() * 20.0) + ((y as f32 * 0.21).cos() * 35.0)
        })
        .unwrap()
    }

    fn full_rect() -> Rect {
        Rect::square(0, 0, 129)
    }

    fn computed(field: &mut Heightfield) -> QuadTree {
        let mut tree = QuadTree::build(&*field).unwrap();
        calculate_height_deltas(field, &mut tree, &full_rect());
        tree.finalise_delta_values(&full_rect());
        tree
    }

    #[test]
    fn test_flat_terrain_has_zero_deltas() {
        let mut field = Heightfield::flat(settings()).unwrap();
        let tree = computed(&mut field);
        for (_, node) in tree.iter() {
            for level in node.lod_levels() {
                assert_eq!(level.max_height_delta(), 0.0);
            }
        }
        assert!(field.delta_data().iter().all(|&d| d == 0.0));
    }

    /// Thresholds rise by at least the margin along every leaf ladder.
    #[test]
    fn test_leaf_ladders_ascend_with_margin() {
        let mut field = bumpy();
        let tree = computed(&mut field);
        for (_, leaf) in tree.leaves() {
            let levels = leaf.lod_levels();
            for pair in levels.windows(2) {
                assert!(
                    pair[1].max_height_delta() >= pair[0].max_height_delta() * DELTA_MARGIN,
                    "ladder not ascending: {} then {}",
                    pair[0].max_height_delta(),
                    pair[1].max_height_delta()
                );
            }
            assert!(levels[0].max_height_delta() > 0.0);
        }
    }

    /// A parent's threshold covers its most demanding child with margin.
    #[test]
    fn test_parent_covers_children_with_margin() {
        let mut field = bumpy();
        let tree = computed(&mut field);
        for (_, node) in tree.iter() {
            let Some(children) = node.children() else {
                continue;
            };
            let max_child = children
                .iter()
                .map(|&c| {
                    let child = tree.node(c);
                    child.lod_level(child.lod_count() - 1).max_height_delta()
                })
                .fold(0.0f32, f32::max);
            assert!(node.lod_level(0).max_height_delta() >= max_child * DELTA_MARGIN);

            let carrier = tree.node(node.child_with_max_height_delta().unwrap());
            assert_eq!(
                carrier.lod_level(carrier.lod_count() - 1).max_height_delta(),
                max_child
            );
        }
    }

    /// A spike on an odd sample is fully visible at LOD 0 of its leaf and
    /// reaches every ancestor, but not the sibling leaves.
    #[test]
    fn test_notify_delta_propagates_to_containing_nodes_only() {
        let field = Heightfield::flat(settings()).unwrap();
        let mut tree = QuadTree::build(&field).unwrap();
        tree.notify_delta(5, 7, 0, 10.0);

        let leaf = tree.find_leaf(5, 7).unwrap();
        assert!(tree.node(leaf).lod_level(0).staging_height_delta() >= 10.0);
        for (id, node) in tree.leaves() {
            if id != leaf && !node.contains_point(5, 7) {
                assert_eq!(node.lod_level(0).staging_height_delta(), 0.0);
            }
        }

        // LOD 0 only exists on leaves; a coarser notification reaches the
        // ancestor whose single level is that LOD.
        tree.notify_delta(5, 7, 3, 4.0);
        let root = tree.node(tree.root());
        assert_eq!(root.base_lod(), 3);
        assert!(root.lod_level(0).staging_height_delta() >= 4.0);
    }

    /// Deltas accumulated but not finalised leave selection thresholds alone.
    #[test]
    fn test_staging_is_isolated_until_finalise() {
        let mut field = bumpy();
        let mut tree = QuadTree::build(&field).unwrap();
        calculate_height_deltas(&mut field, &mut tree, &full_rect());
        let leaf = tree.leaves().next().unwrap().1;
        assert!(leaf.lod_level(0).staging_height_delta() > 0.0);
        assert_eq!(leaf.lod_level(0).max_height_delta(), 0.0);
    }

    /// A localised recompute after an edit leaves far-away thresholds alone.
    #[test]
    fn test_partial_recompute_keeps_untouched_nodes() {
        let mut field = bumpy();
        let mut tree = computed(&mut field);
        let far_leaf = tree.find_leaf(120, 120).unwrap();
        let before = tree.node(far_leaf).lod_level(0).max_height_delta();

        field.set_height(9, 9, 500.0);
        let dirty = field.take_dirty_rect().unwrap();
        let region = calculate_height_deltas(&mut field, &mut tree, &dirty);
        tree.finalise_delta_values(&region);

        assert_eq!(tree.node(far_leaf).lod_level(0).max_height_delta(), before);
        let near_leaf = tree.find_leaf(9, 9).unwrap();
        assert!(tree.node(near_leaf).lod_level(0).max_height_delta() >= 250.0);
    }

    /// Morph deltas land only on vertices that disappear at LOD 1 for the
    /// finest pass, with the sign of interpolated minus actual.
    #[test]
    fn test_signed_morph_delta_stored() {
        let mut field = Heightfield::flat(settings()).unwrap();
        field.set_height(1, 0, 4.0);
        field.take_dirty_rect();
        let mut tree = QuadTree::build(&field).unwrap();
        calculate_height_deltas(&mut field, &mut tree, &full_rect());
        assert_eq!(field.delta_at(1, 0), -4.0);
        assert_eq!(field.delta_at(2, 0), 0.0);
    }
}
