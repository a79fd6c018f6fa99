//! Geometry morphing between adjacent LOD levels.

/// Fraction of a level's distance span, measured back from its transition
/// distance, over which vertices morph toward the next coarser level.
pub const MORPH_REGION: f32 = 0.25;

/// Blend factor in `[0, 1]` for a node rendered at a level whose transition
/// distance is `transition_distance`, where the next finer level (or the
/// finest child) switches away at `finer_transition_distance`.
///
/// Zero while the camera is more than [`MORPH_REGION`] of the span inside the
/// level, ramping linearly to one at the transition distance itself.
pub fn morph_blend(distance: f32, transition_distance: f32, finer_transition_distance: f32) -> f32 {
    let span = transition_distance - finer_transition_distance;
    let region = span * MORPH_REGION;
    if region <= 0.0 {
        return 0.0;
    }
    let remaining = transition_distance - distance;
    (1.0 - remaining / region).clamp(0.0, 1.0)
}

/// Per-draw morph parameters consumed by the terrain vertex shader.
///
/// Vertices whose elimination threshold is below `target_lod` are pulled
/// toward their coarser-level position by `transition`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LodMorph {
    /// Blend factor, 0 = own level, 1 = fully morphed to the coarser level.
    pub transition: f32,
    /// Global LOD index the geometry is morphing toward.
    pub target_lod: f32,
}

static_assertions::assert_eq_size!(LodMorph, [f32; 2]);

impl LodMorph {
    /// Morph parameters for a node at `lod` within its own ladder, whose
    /// ladder starts at global LOD `base_lod`.
    pub fn new(transition: f32, lod: usize, base_lod: u32) -> Self {
        Self {
            transition,
            target_lod: (lod as u32 + base_lod + 1) as f32,
        }
    }
}
