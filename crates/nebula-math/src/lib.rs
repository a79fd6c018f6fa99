//! Grid rectangles and floating-point bounding boxes shared by the terrain crates.

mod aabb;
mod rect;

pub use aabb::Aabb;
pub use rect::Rect;
