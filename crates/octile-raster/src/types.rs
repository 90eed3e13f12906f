//! Plain-data buffers exchanged between pipeline phases
//!
//! Everything here is `#[repr(C)]` and `Pod`, so the pair buffer, tile bins
//! and framebuffer can be uploaded or dumped without conversion.

use crate::key::SortKey;
use crate::primitive::Footprint;
use bytemuck::{Pod, Zeroable};
use octile_core::constants::MAX_NUM_TILES;
use octile_core::{RasterConfig, RasterError, RasterResult};
use std::ops::Range;

/// One primitive-tile overlap
///
/// The key carries the tile and hierarchical rank; `primitive` indexes the
/// scene slice handed to the rasterizer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortPair {
    pub key: SortKey,
    pub primitive: u32,
    pub _pad: u32,
}

impl SortPair {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(key: SortKey, primitive: u32) -> Self {
        Self {
            key,
            primitive,
            _pad: 0,
        }
    }
}

/// Half-open range `[start, end)` of a tile's entries in the sorted buffer
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TileBin {
    pub start: u32,
    pub end: u32,
}

impl TileBin {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn empty_at(index: u32) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Final state of one pixel
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CompositeResult {
    /// Accumulated premultiplied color, background not included
    pub color: [f32; 3],
    /// Light left after the last composited primitive
    pub transmittance: f32,
    /// Transmittance-weighted depth, `Σ T·α·depth`
    pub depth: f32,
    /// Entries walked before the range ended or the pixel terminated
    pub n_visited: u32,
}

impl CompositeResult {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// A pixel nothing was composited into
    pub const CLEAR: Self = Self {
        color: [0.0; 3],
        transmittance: 1.0,
        depth: 0.0,
        n_visited: 0,
    };

    /// Accumulated opacity
    pub fn alpha(&self) -> f32 {
        1.0 - self.transmittance
    }
}

impl Default for CompositeResult {
    fn default() -> Self {
        Self::CLEAR
    }
}

/// Screen partition into fixed-size tiles
///
/// Tile ids are row-major: `ty * tiles_x + tx`. Edge tiles may hang past the
/// viewport; their out-of-bounds pixels are never composited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub block_x: u32,
    pub block_y: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, config: &RasterConfig) -> RasterResult<Self> {
        if config.block_x == 0 || config.block_y == 0 {
            return Err(RasterError::InvalidConfig(
                "tile dimensions must be positive".into(),
            ));
        }
        let tiles_x = width.div_ceil(config.block_x);
        let tiles_y = height.div_ceil(config.block_y);
        let tiles = tiles_x as u64 * tiles_y as u64;
        if tiles > MAX_NUM_TILES {
            return Err(RasterError::TileCountOverflow {
                width,
                height,
                tiles,
                max: MAX_NUM_TILES,
            });
        }
        Ok(Self {
            width,
            height,
            block_x: config.block_x,
            block_y: config.block_y,
            tiles_x,
            tiles_y,
        })
    }

    pub fn num_tiles(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    pub fn num_pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn tile_id(&self, tx: u32, ty: u32) -> u32 {
        ty * self.tiles_x + tx
    }

    #[inline]
    pub fn tile_coords(&self, tile_id: u32) -> (u32, u32) {
        (tile_id % self.tiles_x, tile_id / self.tiles_x)
    }

    /// Pixel rectangle `(x0, y0, x1, y1)`, exclusive upper bound, clipped to
    /// the viewport
    pub fn tile_pixels(&self, tile_id: u32) -> (u32, u32, u32, u32) {
        let (tx, ty) = self.tile_coords(tile_id);
        let x0 = tx * self.block_x;
        let y0 = ty * self.block_y;
        (
            x0,
            y0,
            (x0 + self.block_x).min(self.width),
            (y0 + self.block_y).min(self.height),
        )
    }

    /// Inclusive tile rectangle `(tx0, ty0, tx1, ty1)` covered by a footprint,
    /// or `None` when the footprint misses the viewport
    pub fn tile_span(&self, footprint: &Footprint) -> Option<(u32, u32, u32, u32)> {
        if self.tiles_x == 0 || self.tiles_y == 0 || !footprint.is_valid() {
            return None;
        }
        let (min, max) = (footprint.min, footprint.max);
        let w = self.width as f32;
        let h = self.height as f32;
        if max.x < 0.0 || max.y < 0.0 || min.x >= w || min.y >= h {
            return None;
        }

        let bx = self.block_x as f32;
        let by = self.block_y as f32;
        let clamp_tile = |v: f32, extent: f32, n: u32| -> u32 {
            ((v.max(0.0) / extent).floor() as u32).min(n - 1)
        };
        Some((
            clamp_tile(min.x, bx, self.tiles_x),
            clamp_tile(min.y, by, self.tiles_y),
            clamp_tile(max.x, bx, self.tiles_x),
            clamp_tile(max.y, by, self.tiles_y),
        ))
    }
}
