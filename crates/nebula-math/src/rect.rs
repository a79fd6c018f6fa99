/// Half-open rectangle on the heightfield grid.
///
/// Covers columns `left..right` and rows `top..bottom`. An empty rectangle
/// (zero width or height) intersects nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    /// Create a rectangle from its edges. Swaps edges if given out of order.
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    /// Square rectangle anchored at `(x, y)` with the given side length.
    pub fn square(x: u32, y: u32, side: u32) -> Self {
        Self::new(x, y, x + side, y + side)
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Returns true if the grid point lies inside the half-open area.
    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    /// Returns true if `other` lies entirely within this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        self.left <= other.left
            && self.right >= other.right
            && self.top <= other.top
            && self.bottom >= other.bottom
    }

    /// Returns true if the two rectangles share at least one grid cell.
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// The overlapping area, or `None` when the rectangles are disjoint.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        Some(Rect {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        })
    }

    /// The smallest rectangle enclosing both. Empty inputs are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// Grow the rectangle to include a single grid point.
    pub fn include_point(&self, x: u32, y: u32) -> Rect {
        self.union(&Rect::new(x, y, x + 1, y + 1))
    }

    /// Clamp all edges into `0..=limit`.
    pub fn clamped(&self, limit: u32) -> Rect {
        Rect {
            left: self.left.min(limit),
            top: self.top.min(limit),
            right: self.right.min(limit),
            bottom: self.bottom.min(limit),
        }
    }
}
