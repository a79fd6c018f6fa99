//! Distance thresholds derived from height error, cached per recompute epoch.

/// Scalar that turns a world-space height error into the camera distance at
/// which that error shrinks below the allowed on-screen pixel error.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorCoefficient(f32);

impl ErrorCoefficient {
    /// Wrap a precomputed coefficient.
    ///
    /// # Panics
    ///
    /// Panics if `value` is negative or not finite.
    pub fn new(value: f32) -> Self {
        assert!(
            value.is_finite() && value >= 0.0,
            "error coefficient must be finite and non-negative"
        );
        Self(value)
    }

    /// Derive the coefficient from perspective projection parameters.
    ///
    /// `A / T` where `A = 1 / tan(fov_y / 2)` and
    /// `T = 2 * max_pixel_error / viewport_height`.
    ///
    /// # Panics
    ///
    /// Panics if `max_pixel_error` or `viewport_height` is not positive.
    pub fn from_projection(fov_y_radians: f32, viewport_height: u32, max_pixel_error: f32) -> Self {
        assert!(max_pixel_error > 0.0, "max pixel error must be positive");
        assert!(viewport_height > 0, "viewport height must be positive");
        let a = 1.0 / (fov_y_radians * 0.5).tan();
        let t = 2.0 * max_pixel_error / viewport_height as f32;
        Self::new(a / t)
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Distance beyond which a level with the given maximum height delta
    /// may be used.
    pub fn transition_distance(&self, max_height_delta: f32) -> f32 {
        max_height_delta * self.0
    }
}

/// Monotonic counter bumped whenever the error coefficient changes or cached
/// distances are otherwise invalidated.
#[derive(Clone, Debug, Default)]
pub struct LodEpoch {
    epoch: u64,
    coefficient_bits: Option<u32>,
}

impl LodEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current epoch value.
    pub fn current(&self) -> u64 {
        self.epoch
    }

    /// Record the coefficient for this frame, bumping the epoch if it differs
    /// from the previous one. Returns the epoch to use for cache lookups.
    pub fn observe(&mut self, coefficient: ErrorCoefficient) -> u64 {
        let bits = coefficient.value().to_bits();
        if self.coefficient_bits != Some(bits) {
            self.coefficient_bits = Some(bits);
            self.epoch += 1;
        }
        self.epoch
    }

    /// Force every cache to recompute on its next lookup.
    pub fn invalidate(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

/// Transition distance of a single LOD level, valid for one epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransitionCache {
    epoch: Option<u64>,
    distance: f32,
}

impl TransitionCache {
    /// Return the cached distance for `epoch`, computing and storing it first
    /// if the cache was filled under a different epoch.
    pub fn get_or_compute(
        &mut self,
        epoch: u64,
        coefficient: ErrorCoefficient,
        max_height_delta: f32,
    ) -> f32 {
        if self.epoch != Some(epoch) {
            self.distance = coefficient.transition_distance(max_height_delta);
            self.epoch = Some(epoch);
        }
        self.distance
    }

    /// The cached distance if it was computed for `epoch`.
    pub fn cached(&self, epoch: u64) -> Option<f32> {
        (self.epoch == Some(epoch)).then_some(self.distance)
    }

    pub fn invalidate(&mut self) {
        self.epoch = None;
    }
}
