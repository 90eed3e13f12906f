//! Sort-based tile rasterization of hierarchical volumetric primitives
//!
//! # Architecture
//!
//! A frame runs as four parallel passes with a barrier between each:
//! 1. **Bin**: every primitive emits one [`SortPair`] per overlapped tile,
//!    keyed by `(tile_id << 48) | order_rank`
//! 2. **Sort**: a global unsigned sort groups pairs by tile and orders each
//!    tile's pairs by hierarchical rank
//! 3. **Resolve**: one contiguous [`TileBin`] range per tile
//! 4. **Composite**: per-tile front-to-back alpha blending with clamped
//!    alpha and early termination
//!
//! [`Rasterizer`] drives the passes; the scene side only implements
//! [`Primitive`].

pub mod binner;
pub mod compositor;
pub mod framebuffer;
pub mod key;
pub mod primitive;
pub mod ranges;
pub mod rasterizer;
pub mod sorter;
pub mod types;

#[cfg(test)]
mod tests;

pub use binner::{BinOutput, BinStats, TileBinner};
pub use compositor::{sample_offsets, PerTileCompositor, PixelAccumulator};
pub use framebuffer::Framebuffer;
pub use key::{LevelKeyEncoder, SortKey};
pub use primitive::{Contribution, EvalContext, Footprint, Primitive};
pub use ranges::TileRangeResolver;
pub use rasterizer::{Frame, FrameStats, PhaseTimings, Rasterizer};
pub use sorter::{is_sorted, KeySorter, ParallelSorter, RadixSorter};
pub use types::{CompositeResult, SortPair, TileBin, TileGrid};
