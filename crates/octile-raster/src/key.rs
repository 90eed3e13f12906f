//! Composite sort keys
//!
//! A key packs the screen tile into the top [`NUM_BIT_TILE_ID`] bits and the
//! primitive's hierarchical order rank into the low [`NUM_BIT_ORDER_RANK`]
//! bits. One ascending integer sort then groups entries by tile and orders
//! them by rank inside each tile.

use bytemuck::{Pod, Zeroable};
use octile_core::constants::{MAX_NUM_LEVELS, MAX_NUM_TILES, NUM_BIT_ORDER_RANK, NUM_BIT_TILE_ID};
use octile_core::{OctPath, RasterConfig, RasterError, RasterResult};
use std::fmt;

/// 64-bit `tile_id | order_rank` key, compared as an unsigned integer
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct SortKey(u64);

impl SortKey {
    pub const ORDER_RANK_MASK: u64 = (1 << NUM_BIT_ORDER_RANK) - 1;

    /// Build a key from its fields, failing if either would be truncated
    pub fn from_parts(tile_id: u32, order_rank: u64) -> RasterResult<Self> {
        check_tile_id(tile_id)?;
        if order_rank > Self::ORDER_RANK_MASK {
            // Bits above the rank field would land in a level past the cap
            return Err(RasterError::RankOverflow {
                level: MAX_NUM_LEVELS as usize,
                rank: (order_rank >> NUM_BIT_ORDER_RANK) as u32,
            });
        }
        Ok(Self(((tile_id as u64) << NUM_BIT_ORDER_RANK) | order_rank))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn tile_id(self) -> u32 {
        (self.0 >> NUM_BIT_ORDER_RANK) as u32
    }

    #[inline]
    pub const fn order_rank(self) -> u64 {
        self.0 & Self::ORDER_RANK_MASK
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#018x} (tile {}, rank {:#014x})",
            self.0,
            self.tile_id(),
            self.order_rank()
        )
    }
}

#[inline]
fn check_tile_id(tile_id: u32) -> RasterResult<()> {
    if tile_id as u64 >= MAX_NUM_TILES {
        return Err(RasterError::TileIdOverflow {
            tile_id: tile_id as u64,
            bits: NUM_BIT_TILE_ID,
        });
    }
    Ok(())
}

/// Converts (hierarchical address, tile) pairs into [`SortKey`]s
#[derive(Clone, Copy, Debug)]
pub struct LevelKeyEncoder {
    max_num_levels: u32,
}

impl LevelKeyEncoder {
    pub fn new(config: &RasterConfig) -> Self {
        Self {
            max_num_levels: config.max_num_levels,
        }
    }

    /// Encode a root-first rank sequence
    pub fn encode(&self, ranks: &[u8], tile_id: u32) -> RasterResult<SortKey> {
        let path = OctPath::from_ranks(ranks)?;
        self.encode_path(&path, tile_id)
    }

    /// Encode an already packed address
    ///
    /// The path's bits must stay inside the rank field and be zero past its
    /// depth, otherwise they would leak into the tile id or tie with a
    /// different address.
    #[inline]
    pub fn encode_path(&self, path: &OctPath, tile_id: u32) -> RasterResult<SortKey> {
        if path.depth() > self.max_num_levels as usize {
            return Err(RasterError::TooManyLevels {
                depth: path.depth(),
                max: self.max_num_levels,
            });
        }
        path.validate()?;
        check_tile_id(tile_id)?;
        Ok(SortKey(((tile_id as u64) << NUM_BIT_ORDER_RANK) | path.bits()))
    }
}
