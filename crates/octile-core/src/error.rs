//! Error types for the rasterization pipeline

use thiserror::Error;

/// Result type for rasterization operations
pub type RasterResult<T> = Result<T, RasterError>;

/// Errors that can abort a frame
///
/// Configuration violations are raised before or while encoding keys.
/// Internal-consistency violations mean binning, sorting or range
/// resolution broke its contract; they are never caused by scene data.
#[derive(Error, Debug)]
pub enum RasterError {
    #[error("tile id {tile_id} does not fit in {bits} bits")]
    TileIdOverflow { tile_id: u64, bits: u32 },

    #[error("rank {rank} at level {level} does not fit in 3 bits")]
    RankOverflow { level: usize, rank: u32 },

    #[error("hierarchy depth {depth} exceeds the level cap {max}")]
    TooManyLevels { depth: usize, max: u32 },

    #[error("path of depth {depth} has rank bits set past its last level: {bits:#x}")]
    UnusedLevelBits { depth: usize, bits: u64 },

    #[error("{width}x{height} viewport needs {tiles} tiles, at most {max} are addressable")]
    TileCountOverflow {
        width: u32,
        height: u32,
        tiles: u64,
        max: u64,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("sorted entry {index} belongs to tile {key_tile} but was composited for tile {tile}")]
    TileMismatch { tile: u32, index: usize, key_tile: u32 },

    #[error("sorted entry {index} is followed by a smaller key")]
    UnsortedKeys { index: usize },

    #[error("entry {index} references tile {tile_id}, grid has {num_tiles} tiles")]
    TileOutOfRange {
        index: usize,
        tile_id: u32,
        num_tiles: u32,
    },

    #[error("entry {index} references primitive {primitive}, scene has {num_primitives}")]
    PrimitiveOutOfRange {
        index: usize,
        primitive: u32,
        num_primitives: usize,
    },

    #[error("tile ranges cover {covered} of {total} sorted entries")]
    RangeCoverage { covered: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RasterError {
    /// True for contract breaches inside the pipeline itself
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            RasterError::TileMismatch { .. }
                | RasterError::UnsortedKeys { .. }
                | RasterError::TileOutOfRange { .. }
                | RasterError::PrimitiveOutOfRange { .. }
                | RasterError::RangeCoverage { .. }
        )
    }
}
