//! Frame driver
//!
//! Runs the four phases in order, each one a parallel pass that must finish
//! before the next starts:
//!
//! 1. **Bin**: one `(key, primitive)` pair per primitive-tile overlap
//! 2. **Sort**: global ascending key sort
//! 3. **Resolve**: contiguous range per tile
//! 4. **Composite**: per-tile front-to-back blending

use crate::binner::{BinOutput, BinStats, TileBinner};
use crate::compositor::PerTileCompositor;
use crate::framebuffer::Framebuffer;
use crate::primitive::Primitive;
use crate::ranges::TileRangeResolver;
use crate::sorter::{KeySorter, ParallelSorter};
use crate::types::{SortPair, TileBin, TileGrid};
use octile_core::{RasterConfig, RasterError, RasterResult};
use std::time::{Duration, Instant};

/// Wall-clock time spent in each phase
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseTimings {
    pub bin: Duration,
    pub sort: Duration,
    pub resolve: Duration,
    pub composite: Duration,
}

impl PhaseTimings {
    pub fn total(&self) -> Duration {
        self.bin + self.sort + self.resolve + self.composite
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub primitives: usize,
    pub bin: BinStats,
    /// Tile with the longest range, and its length
    pub busiest_tile: Option<(u32, usize)>,
    pub non_empty_tiles: usize,
    /// Pixels that terminated before their range ended
    pub early_stopped: usize,
    /// Entries walked across all pixels
    pub visited: u64,
    pub timings: PhaseTimings,
}

/// Everything one render produced
#[derive(Clone, Debug)]
pub struct Frame {
    pub framebuffer: Framebuffer,
    /// One range per tile into `pairs`
    pub bins: Vec<TileBin>,
    /// Sorted pair buffer, kept for consumers that replay the walk
    pub pairs: Vec<SortPair>,
    pub stats: FrameStats,
}

pub struct Rasterizer {
    config: RasterConfig,
    pool: Option<rayon::ThreadPool>,
    sorter: Box<dyn KeySorter>,
}

impl Rasterizer {
    pub fn new(config: RasterConfig) -> RasterResult<Self> {
        config.validate()?;

        let pool = match config.num_threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("octile-raster-{}", i))
                    .build()
                    .map_err(|e| RasterError::InvalidConfig(format!("thread pool: {}", e)))?,
            ),
            None => None,
        };

        tracing::debug!(
            "Rasterizer: {}x{} tiles, {} levels, {} samples, {} threads",
            config.block_x,
            config.block_y,
            config.max_num_levels,
            config.n_samp,
            config
                .num_threads
                .map_or_else(|| "global".to_string(), |n| n.to_string())
        );

        Ok(Self {
            config,
            pool,
            sorter: Box::new(ParallelSorter),
        })
    }

    /// Replace the key sorter
    pub fn with_sorter(mut self, sorter: impl KeySorter + 'static) -> Self {
        self.sorter = Box::new(sorter);
        self
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    pub fn sorter_name(&self) -> &'static str {
        self.sorter.name()
    }

    /// Tile grid for a viewport under this rasterizer's tile size
    pub fn grid(&self, width: u32, height: u32) -> RasterResult<TileGrid> {
        TileGrid::new(width, height, &self.config)
    }

    /// Render one frame
    pub fn render<P: Primitive>(&self, grid: &TileGrid, primitives: &[P]) -> RasterResult<Frame> {
        if grid.block_x != self.config.block_x || grid.block_y != self.config.block_y {
            return Err(RasterError::InvalidConfig(format!(
                "grid tiles are {}x{} but the config uses {}x{}",
                grid.block_x, grid.block_y, self.config.block_x, self.config.block_y
            )));
        }

        match &self.pool {
            Some(pool) => pool.install(|| self.run(grid, primitives)),
            None => self.run(grid, primitives),
        }
    }

    fn run<P: Primitive>(&self, grid: &TileGrid, primitives: &[P]) -> RasterResult<Frame> {
        let mut timings = PhaseTimings::default();

        let start = Instant::now();
        let BinOutput {
            mut pairs,
            stats: bin_stats,
        } = TileBinner::new(&self.config, grid).bin(primitives)?;
        timings.bin = start.elapsed();

        let start = Instant::now();
        self.sorter.sort(&mut pairs);
        timings.sort = start.elapsed();

        let start = Instant::now();
        let bins = TileRangeResolver::new(grid.num_tiles()).resolve(&pairs)?;
        timings.resolve = start.elapsed();

        let start = Instant::now();
        let output = PerTileCompositor::new(&self.config, grid, &pairs, primitives).composite(&bins)?;
        timings.composite = start.elapsed();

        let busiest_tile = bins
            .iter()
            .enumerate()
            .filter(|(_, bin)| !bin.is_empty())
            .max_by_key(|(_, bin)| bin.len())
            .map(|(tile, bin)| (tile as u32, bin.len()));

        let stats = FrameStats {
            primitives: primitives.len(),
            bin: bin_stats,
            busiest_tile,
            non_empty_tiles: bins.iter().filter(|b| !b.is_empty()).count(),
            early_stopped: output.early_stopped,
            visited: output.visited,
            timings,
        };

        tracing::debug!(
            "Frame {}x{}: {} primitives, {} pairs over {} tiles, sort={} bin={:?} sort={:?} resolve={:?} composite={:?}",
            grid.width,
            grid.height,
            stats.primitives,
            stats.bin.pairs,
            stats.non_empty_tiles,
            self.sorter.name(),
            timings.bin,
            timings.sort,
            timings.resolve,
            timings.composite
        );

        Ok(Frame {
            framebuffer: output.framebuffer,
            bins,
            pairs,
            stats,
        })
    }
}
