//! Primitive-to-tile binning
//!
//! Two parallel passes separated by an exclusive prefix sum: the first
//! counts how many tiles each primitive touches, the scan hands every
//! primitive its own disjoint slice of the pair buffer, and the second
//! pass fills those slices with `(key, primitive)` pairs.

use crate::key::LevelKeyEncoder;
use crate::primitive::Primitive;
use crate::types::{SortPair, TileGrid};
use octile_core::{OctPath, OverflowPolicy, RasterConfig, RasterError, RasterResult};
use rayon::prelude::*;

/// Per-frame binning counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BinStats {
    /// Primitives that emitted at least one pair
    pub visible: usize,
    /// No footprint, or footprint outside the viewport
    pub culled: usize,
    /// Kept, but with fewer tiles than they overlap
    pub clipped: usize,
    /// Dropped for overlapping too many tiles
    pub rejected: usize,
    pub pairs: usize,
}

/// Unsorted pair buffer plus counters
#[derive(Clone, Debug, Default)]
pub struct BinOutput {
    pub pairs: Vec<SortPair>,
    pub stats: BinStats,
}

#[derive(Clone, Copy, Debug)]
enum Coverage {
    Culled,
    Rejected,
    Tiles {
        path: OctPath,
        /// Inclusive `(tx0, ty0, tx1, ty1)`
        span: (u32, u32, u32, u32),
        count: usize,
        clipped: bool,
    },
}

impl Coverage {
    fn count(&self) -> usize {
        match self {
            Coverage::Tiles { count, .. } => *count,
            _ => 0,
        }
    }
}

pub struct TileBinner<'a> {
    config: &'a RasterConfig,
    grid: &'a TileGrid,
    encoder: LevelKeyEncoder,
}

impl<'a> TileBinner<'a> {
    pub fn new(config: &'a RasterConfig, grid: &'a TileGrid) -> Self {
        Self {
            config,
            grid,
            encoder: LevelKeyEncoder::new(config),
        }
    }

    /// Emit one pair per primitive-tile overlap
    pub fn bin<P: Primitive>(&self, primitives: &[P]) -> RasterResult<BinOutput> {
        if u32::try_from(primitives.len()).is_err() {
            return Err(RasterError::InvalidConfig(format!(
                "{} primitives exceed the u32 reference range",
                primitives.len()
            )));
        }

        // === Pass 1: count overlaps ===
        let plans: Vec<Coverage> = primitives.par_iter().map(|p| self.plan(p)).collect();

        let mut stats = BinStats::default();
        for plan in &plans {
            match plan {
                Coverage::Culled => stats.culled += 1,
                Coverage::Rejected => stats.rejected += 1,
                Coverage::Tiles { clipped, .. } => {
                    stats.visible += 1;
                    if *clipped {
                        stats.clipped += 1;
                    }
                }
            }
        }

        // === Exclusive scan: carve per-primitive write ranges ===
        let total: usize = plans.iter().map(Coverage::count).sum();
        let mut pairs = vec![SortPair::default(); total];
        let mut slots: Vec<&mut [SortPair]> = Vec::with_capacity(plans.len());
        let mut rest = pairs.as_mut_slice();
        for plan in &plans {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(plan.count());
            slots.push(head);
            rest = tail;
        }

        // === Pass 2: write keys ===
        slots
            .into_par_iter()
            .zip(plans.par_iter())
            .enumerate()
            .try_for_each(|(index, (slot, plan))| self.emit(index as u32, plan, slot))?;

        stats.pairs = total;
        if stats.rejected > 0 {
            tracing::warn!(
                "Rejected {} primitives overlapping more than {:?} tiles",
                stats.rejected,
                self.config.max_tiles_per_primitive
            );
        }
        tracing::debug!(
            "Binned {} primitives into {} pairs ({} culled, {} clipped)",
            stats.visible,
            stats.pairs,
            stats.culled,
            stats.clipped
        );

        Ok(BinOutput { pairs, stats })
    }

    fn plan<P: Primitive>(&self, primitive: &P) -> Coverage {
        let Some(span) = primitive
            .footprint()
            .and_then(|fp| self.grid.tile_span(&fp))
        else {
            return Coverage::Culled;
        };

        let (tx0, ty0, tx1, ty1) = span;
        let overlap = (tx1 - tx0 + 1) as usize * (ty1 - ty0 + 1) as usize;
        let (count, clipped) = match self.config.max_tiles_per_primitive {
            Some(cap) if overlap > cap as usize => match self.config.overflow_policy {
                OverflowPolicy::Clip => (cap as usize, true),
                OverflowPolicy::Reject => return Coverage::Rejected,
            },
            _ => (overlap, false),
        };

        Coverage::Tiles {
            path: primitive.address(),
            span,
            count,
            clipped,
        }
    }

    fn emit(&self, index: u32, plan: &Coverage, slot: &mut [SortPair]) -> RasterResult<()> {
        let Coverage::Tiles { path, span, .. } = plan else {
            return Ok(());
        };
        let (tx0, ty0, tx1, ty1) = *span;
        let tiles = (ty0..=ty1).flat_map(|ty| (tx0..=tx1).map(move |tx| (tx, ty)));

        // Row-major order, so clipping keeps the top-left tiles
        for (out, (tx, ty)) in slot.iter_mut().zip(tiles) {
            let key = self.encoder.encode_path(path, self.grid.tile_id(tx, ty))?;
            *out = SortPair::new(key, index);
        }
        Ok(())
    }
}
