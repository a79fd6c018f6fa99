//! Height samples and per-vertex morph deltas backing a terrain.

use glam::Vec3;
use nebula_math::Rect;

use crate::error::TerrainError;
use crate::settings::TerrainSettings;

/// Read access to a square grid of height samples.
///
/// The quadtree only ever reads terrain data through this trait, so any
/// storage that can hand out row-major `size * size` slices can back it.
pub trait HeightfieldSource {
    fn settings(&self) -> &TerrainSettings;

    /// Row-major heights, `size * size` entries.
    fn height_data(&self) -> &[f32];

    /// Row-major signed morph deltas, `size * size` entries.
    fn delta_data(&self) -> &[f32];

    fn height_at(&self, x: u32, y: u32) -> f32 {
        self.height_data()[self.sample_index(x, y)]
    }

    fn delta_at(&self, x: u32, y: u32) -> f32 {
        self.delta_data()[self.sample_index(x, y)]
    }

    fn sample_index(&self, x: u32, y: u32) -> usize {
        let size = self.settings().size;
        debug_assert!(x < size && y < size, "sample ({x}, {y}) outside {size}");
        y as usize * size as usize + x as usize
    }

    /// World position of sample `(x, y)` at the given height, relative to
    /// the terrain origin.
    fn point(&self, x: u32, y: u32, height: f32) -> Vec3 {
        self.settings().point(x, y, height)
    }

    fn lod_level_when_vertex_eliminated(&self, x: u32, y: u32) -> u32 {
        self.settings().lod_level_when_vertex_eliminated(x, y)
    }
}

/// In-memory heightfield with an edit-tracking dirty rectangle.
#[derive(Clone, Debug)]
pub struct Heightfield {
    settings: TerrainSettings,
    heights: Vec<f32>,
    deltas: Vec<f32>,
    dirty: Option<Rect>,
}

impl Heightfield {
    /// A heightfield with every sample at zero.
    pub fn flat(settings: TerrainSettings) -> Result<Self, TerrainError> {
        settings.validate()?;
        let count = settings.size as usize * settings.size as usize;
        Ok(Self {
            settings,
            heights: vec![0.0; count],
            deltas: vec![0.0; count],
            dirty: None,
        })
    }

    /// Wrap existing row-major heights.
    pub fn from_heights(settings: TerrainSettings, heights: Vec<f32>) -> Result<Self, TerrainError> {
        settings.validate()?;
        let expected = settings.size as usize * settings.size as usize;
        if heights.len() != expected {
            return Err(TerrainError::HeightDataLength {
                expected,
                actual: heights.len(),
            });
        }
        Ok(Self {
            settings,
            deltas: vec![0.0; expected],
            heights,
            dirty: None,
        })
    }

    /// Fill every sample from `f(x, y)`.
    pub fn from_fn(
        settings: TerrainSettings,
        mut f: impl FnMut(u32, u32) -> f32,
    ) -> Result<Self, TerrainError> {
        let mut field = Self::flat(settings)?;
        let size = field.settings.size;
        for y in 0..size {
            for x in 0..size {
                let i = field.sample_index(x, y);
                field.heights[i] = f(x, y);
            }
        }
        Ok(field)
    }

    /// Change one sample and grow the dirty rectangle to cover it.
    pub fn set_height(&mut self, x: u32, y: u32, height: f32) {
        let i = self.sample_index(x, y);
        self.heights[i] = height;
        self.dirty = Some(match self.dirty {
            Some(rect) => rect.include_point(x, y),
            None => Rect::new(x, y, x + 1, y + 1),
        });
    }

    pub fn set_delta(&mut self, x: u32, y: u32, delta: f32) {
        let i = self.sample_index(x, y);
        self.deltas[i] = delta;
    }

    pub fn dirty_rect(&self) -> Option<Rect> {
        self.dirty
    }

    /// Clear and return the accumulated dirty rectangle.
    pub fn take_dirty_rect(&mut self) -> Option<Rect> {
        self.dirty.take()
    }

    /// Smallest and largest height in the field.
    pub fn height_range(&self) -> (f32, f32) {
        self.heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| {
                (lo.min(h), hi.max(h))
            })
    }
}

impl HeightfieldSource for Heightfield {
    fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    fn height_data(&self) -> &[f32] {
        &self.heights
    }

    fn delta_data(&self) -> &[f32] {
        &self.deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> TerrainSettings {
        TerrainSettings {
            size: 17,
            world_size: 160.0,
            max_batch_size: 9,
            min_batch_size: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_flat_field_is_zero() {
        let field = Heightfield::flat(small_settings()).unwrap();
        assert_eq!(field.height_data().len(), 17 * 17);
        assert!(field.height_data().iter().all(|&h| h == 0.0));
        assert_eq!(field.height_range(), (0.0, 0.0));
    }

    #[test]
    fn test_from_heights_checks_length() {
        let err = Heightfield::from_heights(small_settings(), vec![0.0; 10]).unwrap_err();
        assert_eq!(
            err,
            TerrainError::HeightDataLength {
                expected: 289,
                actual: 10
            }
        );
    }

    #[test]
    fn test_from_fn_is_row_major() {
        let field = Heightfield::from_fn(small_settings(), |x, y| (x + 100 * y) as f32).unwrap();
        assert_eq!(field.height_at(3, 0), 3.0);
        assert_eq!(field.height_at(0, 2), 200.0);
        assert_eq!(field.height_data()[2 * 17 + 5], 205.0);
    }

    #[test]
    fn test_set_height_grows_dirty_rect() {
        let mut field = Heightfield::flat(small_settings()).unwrap();
        assert_eq!(field.dirty_rect(), None);
        field.set_height(4, 5, 1.0);
        field.set_height(8, 2, 1.0);
        assert_eq!(field.dirty_rect(), Some(Rect::new(4, 2, 9, 6)));
        assert_eq!(field.take_dirty_rect(), Some(Rect::new(4, 2, 9, 6)));
        assert_eq!(field.dirty_rect(), None);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = TerrainSettings {
            size: 16,
            ..small_settings()
        };
        assert!(Heightfield::flat(settings).is_err());
    }
}
