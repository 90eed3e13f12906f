//! Per-tile ranges over the sorted pair buffer
//!
//! Every index compares its tile id with its predecessor's in parallel and
//! reports a boundary where they differ. The boundaries are then expanded
//! into one [`TileBin`] per tile, with empty tiles pinned to the position
//! they would occupy.

use crate::types::{SortPair, TileBin};
use octile_core::{RasterError, RasterResult};
use rayon::prelude::*;

pub struct TileRangeResolver {
    num_tiles: u32,
}

impl TileRangeResolver {
    pub fn new(num_tiles: u32) -> Self {
        Self { num_tiles }
    }

    /// Partition `pairs` into `num_tiles` contiguous ranges
    ///
    /// Fails if a key names a tile outside the grid or the buffer is not
    /// sorted; both mean an earlier phase broke its contract.
    pub fn resolve(&self, pairs: &[SortPair]) -> RasterResult<Vec<TileBin>> {
        let n = pairs.len();
        if u32::try_from(n).is_err() {
            return Err(RasterError::InvalidConfig(format!(
                "{} sorted entries exceed the u32 index range",
                n
            )));
        }

        let starts: Vec<usize> = (0..n)
            .into_par_iter()
            .filter_map(|i| match self.check(pairs, i) {
                Ok(true) => Some(Ok(i)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<RasterResult<Vec<usize>>>()?;

        let mut bins = vec![TileBin::empty_at(0); self.num_tiles as usize];
        let mut next_tile = 0usize;
        for (run, &start) in starts.iter().enumerate() {
            let end = starts.get(run + 1).copied().unwrap_or(n);
            let tile = pairs[start].key.tile_id() as usize;
            for bin in &mut bins[next_tile..tile] {
                *bin = TileBin::empty_at(start as u32);
            }
            bins[tile] = TileBin {
                start: start as u32,
                end: end as u32,
            };
            next_tile = tile + 1;
        }
        for bin in &mut bins[next_tile..] {
            *bin = TileBin::empty_at(n as u32);
        }

        let covered: usize = bins.iter().map(TileBin::len).sum();
        if covered != n {
            return Err(RasterError::RangeCoverage { covered, total: n });
        }

        tracing::debug!(
            "Resolved {} entries into {} non-empty tiles of {}",
            n,
            starts.len(),
            self.num_tiles
        );
        Ok(bins)
    }

    /// Validate entry `i`; `Ok(true)` if it starts a new tile run
    #[inline]
    fn check(&self, pairs: &[SortPair], i: usize) -> RasterResult<bool> {
        let key = pairs[i].key;
        if key.tile_id() >= self.num_tiles {
            return Err(RasterError::TileOutOfRange {
                index: i,
                tile_id: key.tile_id(),
                num_tiles: self.num_tiles,
            });
        }
        if i == 0 {
            return Ok(true);
        }
        let prev = pairs[i - 1].key;
        if prev > key {
            return Err(RasterError::UnsortedKeys { index: i - 1 });
        }
        Ok(prev.tile_id() != key.tile_id())
    }
}
