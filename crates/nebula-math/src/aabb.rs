use glam::Vec3;

/// Floating-point axis-aligned bounding box.
///
/// A freshly created box is *null*: it contains nothing, and the first merged
/// point becomes both corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::NULL
    }
}

impl Aabb {
    /// The empty box. Merging anything into it yields that thing.
    pub const NULL: Aabb = Aabb {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a box from two corners, sorting components per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn is_null(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn set_null(&mut self) {
        *self = Self::NULL;
    }

    /// Extend the box to contain `point`.
    pub fn merge_point(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Extend the box to contain `other`. Null boxes are ignored.
    pub fn merge(&mut self, other: &Aabb) {
        if other.is_null() {
            return;
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// The same box shifted by `offset`. Null stays null.
    pub fn translated(&self, offset: Vec3) -> Aabb {
        if self.is_null() {
            return *self;
        }
        Aabb {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Centre of the box. Meaningless for a null box.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along each axis, zero for a null box.
    pub fn size(&self) -> Vec3 {
        if self.is_null() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }
}
