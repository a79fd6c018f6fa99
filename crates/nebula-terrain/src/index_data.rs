//! Triangle-strip index topology for one LOD of one node.
//!
//! The indices depend only on the shape of the patch inside its vertex data
//! record, never on where the patch sits in the world, so every node with the
//! same [`IndexBufferKey`] can share one index buffer.

/// Everything that determines the index list of a patch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexBufferKey {
    /// Vertices per side drawn for this LOD.
    pub batch_size: u32,
    /// Vertices per side of the main grid in the vertex data record.
    pub record_size: u32,
    /// Record vertices skipped between adjacent drawn vertices.
    pub vertex_increment: u32,
    /// Column of the patch's first vertex within the record.
    pub offset_x: u32,
    /// Row of the patch's first vertex within the record.
    pub offset_y: u32,
    /// Number of skirt rows (and columns) stored in the record.
    pub skirt_rows_cols: u32,
    /// Main-grid rows between consecutive skirt rows.
    pub skirt_row_col_skip: u32,
}

/// Index count for a patch of `batch_size` vertices per side: the main strip,
/// one degenerate per row, and the closed skirt loop.
pub fn index_count(batch_size: u32) -> usize {
    let b = batch_size as usize;
    (2 * b + 1) * (b - 1) + 8 * (b - 1) + 2
}

/// Position of the skirt vertex hanging below main-grid vertex `main_index`.
///
/// Skirt vertices follow the main grid: first `skirt_rows_cols` rows of
/// `record_size` vertices, then as many columns.
pub fn skirt_vertex_index(
    main_index: u32,
    record_size: u32,
    skirt_rows_cols: u32,
    skirt_row_col_skip: u32,
    is_col: bool,
) -> u32 {
    let row = main_index / record_size;
    let col = main_index % record_size;
    let base = record_size * record_size;
    if is_col {
        let skirt = col / skirt_row_col_skip;
        base + skirt_rows_cols * record_size + record_size * skirt + row
    } else {
        let skirt = row / skirt_row_col_skip;
        base + record_size * skirt + col
    }
}

impl IndexBufferKey {
    pub fn index_count(&self) -> usize {
        index_count(self.batch_size)
    }

    /// Build the strip: rows snake right-to-left then left-to-right, each row
    /// closed by a degenerate index, then the four skirt edges are walked as
    /// one loop back to the starting corner.
    pub fn generate(&self) -> Vec<u32> {
        debug_assert!(self.batch_size >= 2, "batch size {}", self.batch_size);
        debug_assert!(self.vertex_increment >= 1, "zero vertex increment");

        let batch = self.batch_size;
        let inc = i64::from(self.vertex_increment);
        let row_size = i64::from(self.record_size) * inc;

        let mut indices = Vec::with_capacity(self.index_count());
        let mut current = i64::from(batch - 1) * inc
            + i64::from(self.offset_y) * i64::from(self.record_size)
            + i64::from(self.offset_x);

        let mut right_to_left = true;
        for _ in 0..batch - 1 {
            for col in 0..batch {
                indices.push(current as u32);
                indices.push((current + row_size) as u32);
                if col + 1 < batch {
                    current += if right_to_left { -inc } else { inc };
                }
            }
            right_to_left = !right_to_left;
            current += row_size;
            indices.push(current as u32);
        }

        for side in 0..4 {
            let (edge_step, skirt_step) = match side {
                0 => (-inc, -inc),
                1 => (-row_size, -inc),
                2 => (inc, inc),
                _ => (row_size, inc),
            };
            let mut skirt = i64::from(skirt_vertex_index(
                current as u32,
                self.record_size,
                self.skirt_rows_cols,
                self.skirt_row_col_skip,
                side % 2 != 0,
            ));
            for _ in 0..batch - 1 {
                indices.push(current as u32);
                indices.push(skirt as u32);
                current += edge_step;
                skirt += skirt_step;
            }
            if side == 3 {
                indices.push(current as u32);
                indices.push(skirt as u32);
            }
        }

        debug_assert_eq!(indices.len(), self.index_count());
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 5x5 record with 3 skirt rows/cols, drawn whole at full detail.
    fn full_key() -> IndexBufferKey {
        IndexBufferKey {
            batch_size: 5,
            record_size: 5,
            vertex_increment: 1,
            offset_x: 0,
            offset_y: 0,
            skirt_rows_cols: 3,
            skirt_row_col_skip: 2,
        }
    }

    #[test]
    fn test_index_count_formula() {
        assert_eq!(index_count(3), 7 * 2 + 8 * 2 + 2);
        assert_eq!(index_count(65), 131 * 64 + 8 * 64 + 2);
        assert_eq!(full_key().generate().len(), index_count(5));
    }

    #[test]
    fn test_strip_starts_at_top_right_corner() {
        let indices = full_key().generate();
        assert_eq!(&indices[..4], &[4, 9, 3, 8]);
    }

    #[test]
    fn test_indices_stay_inside_record() {
        let key = full_key();
        let vertex_count = 5 * 5 + 2 * 5 * 3;
        for &i in &key.generate() {
            assert!(i < vertex_count, "index {i} outside {vertex_count} vertices");
        }
    }

    /// Every main-grid vertex of the patch is referenced by the strip.
    #[test]
    fn test_strip_covers_all_grid_vertices() {
        let indices = full_key().generate();
        for v in 0..25u32 {
            assert!(indices.contains(&v), "vertex {v} never referenced");
        }
    }

    /// The loop ends where it began: bottom-right corner paired with its
    /// column skirt vertex.
    #[test]
    fn test_skirt_loop_closes() {
        let key = full_key();
        let indices = key.generate();
        let n = indices.len();
        assert_eq!(indices[n - 2], 24);
        assert_eq!(indices[n - 1], skirt_vertex_index(24, 5, 3, 2, true));
    }

    /// A coarse patch offset inside a larger record touches only its own
    /// quarter of the main grid.
    #[test]
    fn test_offset_patch_stays_in_its_quadrant() {
        let key = IndexBufferKey {
            batch_size: 3,
            record_size: 9,
            vertex_increment: 2,
            offset_x: 4,
            offset_y: 4,
            skirt_rows_cols: 5,
            skirt_row_col_skip: 2,
        };
        for &i in &key.generate() {
            if i < 81 {
                let (row, col) = (i / 9, i % 9);
                assert!(row >= 4 && col >= 4, "index {i} at ({col}, {row}) outside patch");
                assert!(row % 2 == 0 && col % 2 == 0, "index {i} off the stride");
            }
        }
    }

    #[test]
    fn test_skirt_vertex_layout() {
        // Row skirts come first, then columns.
        assert_eq!(skirt_vertex_index(0, 5, 3, 2, false), 25);
        assert_eq!(skirt_vertex_index(4 * 5 + 3, 5, 3, 2, false), 25 + 2 * 5 + 3);
        assert_eq!(skirt_vertex_index(2 * 5 + 4, 5, 3, 2, true), 25 + 15 + 2 * 5 + 2);
    }
}
