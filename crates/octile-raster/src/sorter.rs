//! Global key sort
//!
//! The rest of the pipeline only relies on an ascending, unsigned,
//! deterministic sort of [`SortPair`]s by key with the payload carried
//! along. Both sorters here are stable, so equal keys keep the order the
//! binner emitted them in.

use crate::types::SortPair;
use rayon::prelude::*;

/// Sorting capability consumed by the rasterizer
pub trait KeySorter: Send + Sync {
    fn sort(&self, pairs: &mut [SortPair]);

    fn name(&self) -> &'static str;
}

/// Rayon's stable parallel merge sort
#[derive(Clone, Copy, Debug, Default)]
pub struct ParallelSorter;

impl KeySorter for ParallelSorter {
    fn sort(&self, pairs: &mut [SortPair]) {
        pairs.par_sort_by_key(|p| p.key);
    }

    fn name(&self) -> &'static str {
        "parallel-merge"
    }
}

/// Least-significant-digit radix sort over 8-bit digits
///
/// Digits that are identical across the whole buffer are skipped, so a frame
/// with few tiles and shallow hierarchies only pays for the bytes in use.
#[derive(Clone, Copy, Debug, Default)]
pub struct RadixSorter;

const RADIX_BITS: u32 = 8;
const RADIX: usize = 1 << RADIX_BITS;

impl KeySorter for RadixSorter {
    fn sort(&self, pairs: &mut [SortPair]) {
        if pairs.len() < 2 {
            return;
        }

        let (any, all) = pairs
            .iter()
            .fold((0u64, u64::MAX), |(any, all), p| (any | p.key.raw(), all & p.key.raw()));
        let varying = any ^ all;

        let mut scratch = vec![SortPair::default(); pairs.len()];
        let mut in_scratch = false;

        for pass in 0..(64 / RADIX_BITS) {
            let shift = pass * RADIX_BITS;
            if (varying >> shift) & (RADIX as u64 - 1) == 0 {
                continue;
            }
            let (src, dst) = if in_scratch {
                (&scratch[..], &mut pairs[..])
            } else {
                (&pairs[..], &mut scratch[..])
            };
            scatter_digit(src, dst, shift);
            in_scratch = !in_scratch;
        }

        if in_scratch {
            pairs.copy_from_slice(&scratch);
        }
    }

    fn name(&self) -> &'static str {
        "radix"
    }
}

fn scatter_digit(src: &[SortPair], dst: &mut [SortPair], shift: u32) {
    let digit = |p: &SortPair| ((p.key.raw() >> shift) as usize) & (RADIX - 1);

    let mut offsets = [0usize; RADIX];
    for p in src {
        offsets[digit(p)] += 1;
    }
    let mut sum = 0;
    for slot in offsets.iter_mut() {
        let count = *slot;
        *slot = sum;
        sum += count;
    }
    for p in src {
        let d = digit(p);
        dst[offsets[d]] = *p;
        offsets[d] += 1;
    }
}

/// True if keys never decrease
pub fn is_sorted(pairs: &[SortPair]) -> bool {
    pairs.windows(2).all(|w| w[0].key <= w[1].key)
}
