use thiserror::Error;

/// Errors from checked terrain construction.
///
/// Everything past construction treats a broken invariant as a bug and
/// asserts instead of returning one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TerrainError {
    #[error("terrain size {0} is not a power of two plus one")]
    InvalidSize(u32),

    #[error("batch size {0} is not a power of two plus one")]
    InvalidBatchSize(u32),

    #[error("minimum batch size {min} exceeds maximum batch size {max}")]
    BatchSizeOrder { min: u32, max: u32 },

    #[error("maximum batch size {max} exceeds terrain size {size}")]
    BatchLargerThanTerrain { max: u32, size: u32 },

    #[error("terrain size {0} does not fit 16-bit grid coordinates")]
    SizeTooLarge(u32),

    #[error("expected {expected} height samples, got {actual}")]
    HeightDataLength { expected: usize, actual: usize },

    #[error("vertex data depth range {start}..{end} is not within tree depth {depth}")]
    DepthRange { start: u32, end: u32, depth: u32 },

    #[error("vertex data resolution {resolution} is invalid for terrain size {size}")]
    InvalidResolution { resolution: u32, size: u32 },

    #[error("vertex data record size {size} does not match the expected {expected}")]
    InvalidRecordSize { size: u32, expected: u32 },

    #[error("heightfield settings do not match the quadtree it is applied to")]
    SettingsMismatch,
}
