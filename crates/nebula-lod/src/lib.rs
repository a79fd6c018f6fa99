//! Level-of-detail math: screen-space error coefficients, cached transition distances, and morph blending.

mod selector;
mod transition;

pub use selector::{ErrorCoefficient, LodEpoch, TransitionCache};
pub use transition::{LodMorph, MORPH_REGION, morph_blend};
