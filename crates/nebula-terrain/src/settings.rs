//! Terrain dimensions, batch sizes and grid-to-world mapping.

use glam::Vec3;

use crate::error::TerrainError;

/// World plane the heightfield grid lies in. Heights are measured along the
/// remaining axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Alignment {
    /// Grid in the XZ plane, height along +Y.
    #[default]
    XZ,
    /// Grid in the XY plane, height along +Z.
    XY,
    /// Grid in the YZ plane, height along +X.
    YZ,
}

/// Static shape of a terrain: grid size, world extent and batch sizes.
///
/// All derived LOD counts come from here so the quadtree, the delta driver
/// and the vertex generator agree on them.
#[derive(Clone, Debug, PartialEq)]
pub struct TerrainSettings {
    /// Vertices per side of the full heightfield, `2^n + 1`.
    pub size: u32,
    /// World-space length of one side.
    pub world_size: f32,
    /// Largest batch rendered by a single leaf, `2^n + 1`.
    pub max_batch_size: u32,
    /// Smallest batch rendered by any node, `2^n + 1`.
    pub min_batch_size: u32,
    /// Depth skirt vertices are pushed below the surface.
    pub skirt_size: f32,
    pub alignment: Alignment,
    /// World-space origin of the terrain centre.
    pub position: Vec3,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            size: 513,
            world_size: 12_000.0,
            max_batch_size: 65,
            min_batch_size: 33,
            skirt_size: 30.0,
            alignment: Alignment::XZ,
            position: Vec3::ZERO,
        }
    }
}

/// `true` for `2^n + 1` with `n >= 1`.
pub fn is_power_of_two_plus_one(n: u32) -> bool {
    n >= 3 && (n - 1).is_power_of_two()
}

impl TerrainSettings {
    /// Check sizes against each other.
    pub fn validate(&self) -> Result<(), TerrainError> {
        if !is_power_of_two_plus_one(self.size) {
            return Err(TerrainError::InvalidSize(self.size));
        }
        if self.size - 1 > u32::from(u16::MAX) {
            return Err(TerrainError::SizeTooLarge(self.size));
        }
        for batch in [self.max_batch_size, self.min_batch_size] {
            if !is_power_of_two_plus_one(batch) {
                return Err(TerrainError::InvalidBatchSize(batch));
            }
        }
        if self.min_batch_size > self.max_batch_size {
            return Err(TerrainError::BatchSizeOrder {
                min: self.min_batch_size,
                max: self.max_batch_size,
            });
        }
        if self.max_batch_size > self.size {
            return Err(TerrainError::BatchLargerThanTerrain {
                max: self.max_batch_size,
                size: self.size,
            });
        }
        Ok(())
    }

    /// Number of LOD levels across the whole terrain, finest (0) to the
    /// root's single coarse level.
    pub fn num_lod_levels(&self) -> u32 {
        ((self.size - 1) / (self.min_batch_size - 1)).trailing_zeros() + 1
    }

    /// Length of every leaf's LOD ladder.
    pub fn num_lod_levels_per_leaf(&self) -> u32 {
        ((self.max_batch_size - 1) / (self.min_batch_size - 1)).trailing_zeros() + 1
    }

    /// Number of node levels in the quadtree, root included.
    pub fn tree_depth(&self) -> u32 {
        self.num_lod_levels() - self.num_lod_levels_per_leaf() + 1
    }

    /// World distance between adjacent grid samples.
    pub fn grid_scale(&self) -> f32 {
        self.world_size / (self.size - 1) as f32
    }

    /// World coordinate of grid sample 0 along both grid axes.
    pub fn grid_base(&self) -> f32 {
        -self.world_size * 0.5
    }

    /// World position of grid sample `(x, y)` displaced by `height`, relative
    /// to the terrain origin.
    pub fn point(&self, x: u32, y: u32, height: f32) -> Vec3 {
        let scale = self.grid_scale();
        let base = self.grid_base();
        let u = x as f32 * scale + base;
        let v = y as f32 * scale + base;
        match self.alignment {
            Alignment::XZ => Vec3::new(u, height, -(y as f32 * scale) - base),
            Alignment::XY => Vec3::new(u, v, height),
            Alignment::YZ => Vec3::new(height, v, -(x as f32 * scale) - base),
        }
    }

    /// Rotate a terrain-space vector (x along the grid x, y along the grid
    /// y, z along the height) into world orientation.
    pub fn vector(&self, v: Vec3) -> Vec3 {
        match self.alignment {
            Alignment::XZ => Vec3::new(v.x, v.z, -v.y),
            Alignment::XY => v,
            Alignment::YZ => Vec3::new(v.z, v.y, -v.x),
        }
    }

    /// The height component of a world-space vector.
    pub fn height_component(&self, v: Vec3) -> f32 {
        match self.alignment {
            Alignment::XZ => v.y,
            Alignment::XY => v.z,
            Alignment::YZ => v.x,
        }
    }

    /// First global LOD at which vertex `(x, y)` is no longer part of the
    /// mesh. Vertices on the coarsest grid return [`Self::num_lod_levels`].
    pub fn lod_level_when_vertex_eliminated(&self, x: u32, y: u32) -> u32 {
        self.lod_level_when_coord_eliminated(x)
            .min(self.lod_level_when_coord_eliminated(y))
    }

    fn lod_level_when_coord_eliminated(&self, coord: u32) -> u32 {
        let mut spacing = (self.size - 1) / (self.min_batch_size - 1);
        let mut lod = self.num_lod_levels();
        while spacing > 1 && coord % spacing != 0 {
            spacing /= 2;
            lod -= 1;
        }
        lod
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        assert_eq!(TerrainSettings::default().validate(), Ok(()));
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        let s = TerrainSettings {
            size: 500,
            ..Default::default()
        };
        assert_eq!(s.validate(), Err(TerrainError::InvalidSize(500)));

        let s = TerrainSettings {
            max_batch_size: 64,
            ..Default::default()
        };
        assert_eq!(s.validate(), Err(TerrainError::InvalidBatchSize(64)));

        let s = TerrainSettings {
            max_batch_size: 17,
            min_batch_size: 33,
            ..Default::default()
        };
        assert_eq!(
            s.validate(),
            Err(TerrainError::BatchSizeOrder { min: 33, max: 17 })
        );

        let s = TerrainSettings {
            size: 33,
            ..Default::default()
        };
        assert_eq!(
            s.validate(),
            Err(TerrainError::BatchLargerThanTerrain { max: 65, size: 33 })
        );
    }

    /// 513 / 65 / 33 gives 5 LOD levels, 2 per leaf and a 4-level tree.
    #[test]
    fn test_lod_derivations() {
        let s = TerrainSettings::default();
        assert_eq!(s.num_lod_levels(), 5);
        assert_eq!(s.num_lod_levels_per_leaf(), 2);
        assert_eq!(s.tree_depth(), 4);
    }

    #[test]
    fn test_point_mapping_per_alignment() {
        let mut s = TerrainSettings {
            size: 5,
            world_size: 8.0,
            max_batch_size: 5,
            min_batch_size: 3,
            ..Default::default()
        };
        // scale 2, base -4
        assert_eq!(s.point(0, 0, 1.0), Vec3::new(-4.0, 1.0, 4.0));
        assert_eq!(s.point(4, 4, 0.0), Vec3::new(4.0, 0.0, -4.0));

        s.alignment = Alignment::XY;
        assert_eq!(s.point(1, 3, 7.0), Vec3::new(-2.0, 2.0, 7.0));

        s.alignment = Alignment::YZ;
        assert_eq!(s.point(1, 3, 7.0), Vec3::new(7.0, 2.0, 2.0));
    }

    #[test]
    fn test_vector_and_height_component_agree() {
        for alignment in [Alignment::XZ, Alignment::XY, Alignment::YZ] {
            let s = TerrainSettings {
                alignment,
                ..Default::default()
            };
            let up = s.vector(Vec3::Z);
            assert_eq!(s.height_component(up), 1.0, "{alignment:?}");
        }
    }

    #[test]
    fn test_vertex_elimination_levels() {
        let s = TerrainSettings::default();
        // Coarsest spacing is 16 with 5 levels.
        assert_eq!(s.lod_level_when_vertex_eliminated(0, 0), 5);
        assert_eq!(s.lod_level_when_vertex_eliminated(16, 512), 5);
        assert_eq!(s.lod_level_when_vertex_eliminated(1, 0), 1);
        assert_eq!(s.lod_level_when_vertex_eliminated(2, 4), 2);
        assert_eq!(s.lod_level_when_vertex_eliminated(8, 16), 4);
        assert_eq!(s.lod_level_when_vertex_eliminated(8, 3), 1);
    }
}
