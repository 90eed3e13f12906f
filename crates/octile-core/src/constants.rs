//! Build-time defaults for the tile rasterizer
//!
//! These seed [`crate::config::RasterConfig::default`]. The bit-field widths
//! at the bottom are structural and cannot be overridden at runtime.

/// Tile width in pixels
pub const BLOCK_X: u32 = 16;

/// Tile height in pixels
pub const BLOCK_Y: u32 = 16;

/// Pixels per tile (one compositing lane each)
pub const BLOCK_SIZE: u32 = BLOCK_X * BLOCK_Y;

/// Maximum depth of the primitive hierarchy
pub const MAX_NUM_LEVELS: u32 = 16;

/// Upper opacity clamp; keeps `1 - alpha` away from zero
pub const MAX_ALPHA: f32 = 0.99999;

/// Lower opacity clamp
pub const MIN_ALPHA: f32 = 0.00001;

/// Transmittance below which a pixel stops walking its tile range
pub const EARLY_STOP_T: f32 = 0.0001;

/// Ray-marching step multiplier handed to the evaluation collaborator
pub const STEP_SZ_SCALE: f32 = 100.0;

/// Hard cap on evaluations combined per primitive-pixel pair
pub const MAX_N_SAMP: u32 = 3;

/// Bits per hierarchy level (each node has at most 8 children)
pub const NUM_BIT_PER_LEVEL: u32 = 3;

/// Width of the order-rank field in a sort key
pub const NUM_BIT_ORDER_RANK: u32 = NUM_BIT_PER_LEVEL * MAX_NUM_LEVELS;

/// Width of the tile-id field in a sort key
pub const NUM_BIT_TILE_ID: u32 = 64 - NUM_BIT_ORDER_RANK;

/// Number of addressable tiles
pub const MAX_NUM_TILES: u64 = 1 << NUM_BIT_TILE_ID;

/// Upper bound on a configurable tile's pixel count
pub const MAX_BLOCK_SIZE: u32 = 1024;
