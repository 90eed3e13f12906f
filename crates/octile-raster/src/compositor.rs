//! Front-to-back compositing over sorted tile ranges
//!
//! Each tile is an independent rayon task. Inside a tile every pixel owns a
//! [`PixelAccumulator`] and walks the tile's range in key order:
//!
//! ```text
//! color        += T * alpha * primitive_color
//! transmittance = T * (1 - alpha)
//! ```
//!
//! with `alpha` clamped to `[min_alpha, max_alpha]` and the walk stopping as
//! soon as transmittance drops below `early_stop_t`.

use crate::framebuffer::Framebuffer;
use crate::primitive::{Contribution, EvalContext, Primitive};
use crate::types::{CompositeResult, SortPair, TileBin, TileGrid};
use glam::{Vec2, Vec3};
use octile_core::constants::MAX_N_SAMP;
use octile_core::{RasterConfig, RasterError, RasterResult};
use rayon::prelude::*;

/// Sub-pixel sample positions, indexed by `n_samp - 1`
const SAMPLE_OFFSETS: [[Vec2; MAX_N_SAMP as usize]; MAX_N_SAMP as usize] = [
    [Vec2::new(0.5, 0.5), Vec2::ZERO, Vec2::ZERO],
    [Vec2::new(0.25, 0.25), Vec2::new(0.75, 0.75), Vec2::ZERO],
    [
        Vec2::new(0.5, 1.0 / 6.0),
        Vec2::new(1.0 / 6.0, 5.0 / 6.0),
        Vec2::new(5.0 / 6.0, 5.0 / 6.0),
    ],
];

/// Offsets inside the unit pixel for `n_samp` samples
pub fn sample_offsets(n_samp: u32) -> &'static [Vec2] {
    let n = n_samp.clamp(1, MAX_N_SAMP) as usize;
    &SAMPLE_OFFSETS[n - 1][..n]
}

/// Running state of one pixel during a tile pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelAccumulator {
    pub color: Vec3,
    pub transmittance: f32,
    pub depth: f32,
    pub n_visited: u32,
}

impl Default for PixelAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelAccumulator {
    pub fn new() -> Self {
        Self {
            color: Vec3::ZERO,
            transmittance: 1.0,
            depth: 0.0,
            n_visited: 0,
        }
    }

    /// Composite one already clamped contribution behind everything so far
    #[inline]
    pub fn blend(&mut self, color: Vec3, alpha: f32, depth: f32) {
        let weight = self.transmittance * alpha;
        self.color += weight * color;
        self.depth += weight * depth;
        self.transmittance *= 1.0 - alpha;
    }

    #[inline]
    pub fn is_terminated(&self, early_stop_t: f32) -> bool {
        self.transmittance < early_stop_t
    }

    pub fn finish(self) -> CompositeResult {
        CompositeResult {
            color: self.color.to_array(),
            transmittance: self.transmittance,
            depth: self.depth,
            n_visited: self.n_visited,
        }
    }
}

/// Composited pixels of one tile, row-major over the clipped tile rectangle
#[derive(Clone, Debug)]
pub struct TileOutput {
    pub tile_id: u32,
    pub pixels: Vec<CompositeResult>,
    pub early_stopped: usize,
}

/// Framebuffer plus per-frame compositing counters
#[derive(Clone, Debug)]
pub struct CompositeOutput {
    pub framebuffer: Framebuffer,
    /// Pixels that hit the transmittance threshold
    pub early_stopped: usize,
    /// Sum of `n_visited` over all pixels
    pub visited: u64,
}

pub struct PerTileCompositor<'a, P> {
    config: &'a RasterConfig,
    grid: &'a TileGrid,
    pairs: &'a [SortPair],
    primitives: &'a [P],
    offsets: &'static [Vec2],
}

impl<'a, P: Primitive> PerTileCompositor<'a, P> {
    pub fn new(
        config: &'a RasterConfig,
        grid: &'a TileGrid,
        pairs: &'a [SortPair],
        primitives: &'a [P],
    ) -> Self {
        Self {
            config,
            grid,
            pairs,
            primitives,
            offsets: sample_offsets(config.n_samp),
        }
    }

    /// Composite every tile and assemble the framebuffer
    pub fn composite(&self, bins: &[TileBin]) -> RasterResult<CompositeOutput> {
        if bins.len() != self.grid.num_tiles() as usize {
            return Err(RasterError::RangeCoverage {
                covered: bins.len(),
                total: self.grid.num_tiles() as usize,
            });
        }

        let tiles: Vec<TileOutput> = bins
            .par_iter()
            .enumerate()
            .map(|(tile_id, bin)| self.composite_tile(tile_id as u32, bin))
            .collect::<RasterResult<_>>()?;

        // Tiles are disjoint, so every pixel is written exactly once
        let mut framebuffer = Framebuffer::new(self.grid.width, self.grid.height);
        let mut early_stopped = 0;
        let mut visited = 0u64;
        for tile in &tiles {
            let rect = self.grid.tile_pixels(tile.tile_id);
            framebuffer.write_tile(rect, &tile.pixels);
            early_stopped += tile.early_stopped;
            visited += tile.pixels.iter().map(|p| p.n_visited as u64).sum::<u64>();
        }

        Ok(CompositeOutput {
            framebuffer,
            early_stopped,
            visited,
        })
    }

    /// Composite all in-viewport pixels of one tile
    pub fn composite_tile(&self, tile_id: u32, bin: &TileBin) -> RasterResult<TileOutput> {
        self.validate_range(tile_id, bin)?;

        let (x0, y0, x1, y1) = self.grid.tile_pixels(tile_id);
        let mut pixels = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
        let mut early_stopped = 0;

        for py in y0..y1 {
            for px in x0..x1 {
                let (result, stopped) = self.composite_pixel(tile_id, bin, px, py);
                pixels.push(result);
                early_stopped += stopped as usize;
            }
        }

        Ok(TileOutput {
            tile_id,
            pixels,
            early_stopped,
        })
    }

    /// Every entry in the range must belong to `tile_id` and reference a
    /// real primitive
    fn validate_range(&self, tile_id: u32, bin: &TileBin) -> RasterResult<()> {
        let entries = self
            .pairs
            .get(bin.range())
            .ok_or(RasterError::RangeCoverage {
                covered: bin.end as usize,
                total: self.pairs.len(),
            })?;
        for (offset, pair) in entries.iter().enumerate() {
            let index = bin.start as usize + offset;
            if pair.key.tile_id() != tile_id {
                return Err(RasterError::TileMismatch {
                    tile: tile_id,
                    index,
                    key_tile: pair.key.tile_id(),
                });
            }
            if pair.primitive as usize >= self.primitives.len() {
                return Err(RasterError::PrimitiveOutOfRange {
                    index,
                    primitive: pair.primitive,
                    num_primitives: self.primitives.len(),
                });
            }
        }
        Ok(())
    }

    /// Walk a validated range for one pixel; the flag reports early stop
    fn composite_pixel(&self, tile_id: u32, bin: &TileBin, px: u32, py: u32) -> (CompositeResult, bool) {
        let origin = Vec2::new(px as f32, py as f32);
        let mut acc = PixelAccumulator::new();
        let mut stopped = false;

        for pair in &self.pairs[bin.range()] {
            acc.n_visited += 1;
            let primitive = &self.primitives[pair.primitive as usize];
            let Some(sample) = self.evaluate(primitive, tile_id, origin) else {
                continue;
            };

            let alpha = self.config.clamp_alpha(sample.alpha);
            acc.blend(sample.color, alpha, sample.depth);
            if acc.is_terminated(self.config.early_stop_t) {
                stopped = true;
                break;
            }
        }

        (acc.finish(), stopped)
    }

    /// Combine up to `n_samp` evaluations into one contribution
    ///
    /// Alpha is averaged over all samples, uncovered ones counting as zero.
    /// Color and depth are averaged with per-sample alpha as weight.
    fn evaluate(&self, primitive: &P, tile_id: u32, origin: Vec2) -> Option<Contribution> {
        let n_samp = self.offsets.len() as u32;
        let mut ctx = EvalContext {
            tile_id,
            sample: 0,
            n_samp,
            step_sz_scale: self.config.step_sz_scale,
        };

        if n_samp == 1 {
            return primitive.evaluate(origin + self.offsets[0], &ctx).map(|c| Contribution {
                alpha: raw_alpha(c.alpha),
                ..c
            });
        }

        let mut covered = 0u32;
        let mut alpha_sum = 0.0f32;
        let mut weighted_color = Vec3::ZERO;
        let mut weighted_depth = 0.0f32;
        let mut plain_color = Vec3::ZERO;
        let mut plain_depth = 0.0f32;

        for (sample, offset) in self.offsets.iter().enumerate() {
            ctx.sample = sample as u32;
            let Some(c) = primitive.evaluate(origin + *offset, &ctx) else {
                continue;
            };
            let alpha = raw_alpha(c.alpha);
            covered += 1;
            alpha_sum += alpha;
            weighted_color += alpha * c.color;
            weighted_depth += alpha * c.depth;
            plain_color += c.color;
            plain_depth += c.depth;
        }

        if covered == 0 {
            return None;
        }
        let (color, depth) = if alpha_sum > 0.0 {
            (weighted_color / alpha_sum, weighted_depth / alpha_sum)
        } else {
            (plain_color / covered as f32, plain_depth / covered as f32)
        };
        Some(Contribution {
            color,
            alpha: alpha_sum / n_samp as f32,
            depth,
        })
    }
}

/// Evaluated opacity with NaN and negative values mapped to zero, before
/// any averaging or clamping
#[inline]
fn raw_alpha(alpha: f32) -> f32 {
    if alpha.is_nan() {
        0.0
    } else {
        alpha.max(0.0)
    }
}
