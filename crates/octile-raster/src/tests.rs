use crate::*;
use approx::{assert_abs_diff_eq, assert_relative_eq};
use glam::{Vec2, Vec3};
use octile_core::constants::{EARLY_STOP_T, MAX_N_SAMP};
use octile_core::{OctPath, RasterConfig, RasterError};

/// Axis-aligned screen rectangle with constant color and opacity
struct Quad {
    address: OctPath,
    min: Vec2,
    max: Vec2,
    color: Vec3,
    alpha: f32,
}

impl Quad {
    fn new(ranks: &[u8], min: (f32, f32), max: (f32, f32), color: Vec3, alpha: f32) -> Self {
        Self {
            address: OctPath::from_ranks(ranks).unwrap(),
            min: Vec2::new(min.0, min.1),
            max: Vec2::new(max.0, max.1),
            color,
            alpha,
        }
    }

    fn full(ranks: &[u8], width: u32, height: u32, color: Vec3, alpha: f32) -> Self {
        Self::new(ranks, (0.0, 0.0), (width as f32, height as f32), color, alpha)
    }
}

impl Primitive for Quad {
    fn address(&self) -> OctPath {
        self.address
    }

    fn footprint(&self) -> Option<Footprint> {
        Some(Footprint::new(self.min, self.max))
    }

    fn evaluate(&self, position: Vec2, _ctx: &EvalContext) -> Option<Contribution> {
        let inside = position.cmpge(self.min).all() && position.cmplt(self.max).all();
        inside.then(|| Contribution::new(self.color, self.alpha).with_depth(self.address.depth() as f32))
    }
}

const RED: Vec3 = Vec3::new(1.0, 0.0, 0.0);
const BLUE: Vec3 = Vec3::new(0.0, 0.0, 1.0);

fn render(config: RasterConfig, width: u32, height: u32, prims: &[Quad]) -> Frame {
    let raster = Rasterizer::new(config).unwrap();
    let grid = raster.grid(width, height).unwrap();
    raster.render(&grid, prims).unwrap()
}

#[test]
fn test_two_layers_front_to_back() {
    let prims = vec![
        Quad::full(&[0], 32, 32, RED, 0.5),
        Quad::full(&[1], 32, 32, BLUE, 0.5),
    ];
    let frame = render(RasterConfig::default(), 32, 32, &prims);

    for (x, y) in [(0, 0), (5, 5), (31, 31), (16, 3)] {
        let p = frame.framebuffer.get(x, y).unwrap();
        assert_relative_eq!(p.color[0], 0.5);
        assert_relative_eq!(p.color[1], 0.0);
        assert_relative_eq!(p.color[2], 0.25);
        assert_relative_eq!(p.transmittance, 0.25);
        assert_eq!(p.n_visited, 2);
    }
}

#[test]
fn test_rank_decides_order_not_emission() {
    // Blue is emitted second but ranks first
    let prims = vec![
        Quad::full(&[3], 16, 16, RED, 0.5),
        Quad::full(&[1], 16, 16, BLUE, 0.5),
    ];
    let frame = render(RasterConfig::default(), 16, 16, &prims);
    let p = frame.framebuffer.get(7, 7).unwrap();
    assert_relative_eq!(p.color[2], 0.5);
    assert_relative_eq!(p.color[0], 0.25);
    assert_eq!(frame.pairs[0].primitive, 1);
}

#[test]
fn test_empty_tile_stays_clear() {
    let prims = vec![Quad::new(&[0], (0.0, 0.0), (8.0, 8.0), RED, 0.8)];
    let frame = render(RasterConfig::default(), 48, 32, &prims);
    assert_eq!(frame.stats.non_empty_tiles, 1);

    let far = frame.framebuffer.get(40, 20).unwrap();
    assert_eq!(*far, CompositeResult::CLEAR);
    assert_eq!(far.color, [0.0; 3]);
    assert_eq!(far.transmittance, 1.0);

    // Same tile as the quad but outside it: walked, nothing composited
    let beside = frame.framebuffer.get(12, 12).unwrap();
    assert_eq!(beside.n_visited, 1);
    assert_eq!(beside.transmittance, 1.0);
}

#[test]
fn test_tile_isolation_and_coverage() {
    let prims = vec![
        Quad::new(&[2, 5], (3.0, 3.0), (40.0, 20.0), RED, 0.3),
        Quad::new(&[1], (20.0, 0.0), (60.0, 50.0), BLUE, 0.6),
        Quad::new(&[7, 7, 7], (-10.0, 30.0), (10.0, 45.0), Vec3::ONE, 0.9),
        Quad::new(&[4], (100.0, 100.0), (120.0, 120.0), Vec3::ONE, 0.9),
    ];
    let frame = render(RasterConfig::default(), 64, 48, &prims);
    assert_eq!(frame.stats.bin.culled, 1);
    assert_eq!(frame.bins.len(), 12);
    assert!(is_sorted(&frame.pairs));

    let mut cursor = 0;
    for (tile, bin) in frame.bins.iter().enumerate() {
        assert_eq!(bin.start, cursor);
        cursor = bin.end;
        let entries = &frame.pairs[bin.range()];
        for e in entries {
            assert_eq!(e.key.tile_id() as usize, tile);
        }
        assert!(entries.windows(2).all(|w| w[0].key.order_rank() <= w[1].key.order_rank()));
    }
    assert_eq!(cursor as usize, frame.pairs.len());
    assert_eq!(frame.stats.bin.pairs, frame.pairs.len());
}

#[test]
fn test_viewport_not_multiple_of_tile() {
    let prims = vec![Quad::full(&[0], 20, 18, Vec3::ONE, 0.5)];
    let frame = render(RasterConfig::default(), 20, 18, &prims);
    assert_eq!(frame.framebuffer.pixels().len(), 20 * 18);
    for p in frame.framebuffer.pixels() {
        assert_relative_eq!(p.transmittance, 0.5);
        assert_eq!(p.n_visited, 1);
    }
}

#[test]
fn test_early_stop_on_saturation() {
    let prims = vec![
        Quad::full(&[0], 16, 16, RED, 1.0),
        Quad::full(&[1], 16, 16, BLUE, 1.0),
        Quad::full(&[2], 16, 16, BLUE, 1.0),
    ];
    let frame = render(RasterConfig::default(), 16, 16, &prims);
    let p = frame.framebuffer.get(3, 3).unwrap();
    assert_eq!(p.n_visited, 1);
    assert!(p.transmittance > 0.0);
    assert!(p.transmittance < EARLY_STOP_T);
    assert_relative_eq!(p.color[0], octile_core::constants::MAX_ALPHA);
    assert_eq!(p.color[2], 0.0);
    assert_eq!(frame.stats.early_stopped, 256);
}

#[test]
fn test_early_stop_mid_range_bounds_skipped_light() {
    // T after k layers is 0.2^k; the sixth layer takes it below 1e-4
    let colors = [RED, BLUE, Vec3::ONE, RED, BLUE, Vec3::ONE, RED, BLUE, Vec3::ONE, RED];
    let prims: Vec<Quad> = colors
        .iter()
        .enumerate()
        .map(|(i, &c)| Quad::full(&[i as u8 / 8, i as u8 % 8], 16, 16, c, 0.8))
        .collect();
    let frame = render(RasterConfig::default(), 16, 16, &prims);
    let p = frame.framebuffer.get(9, 2).unwrap();
    assert_eq!(p.n_visited, 6);
    assert!(p.transmittance < EARLY_STOP_T);
    assert_eq!(frame.stats.early_stopped, 256);

    // Same walk without the threshold
    let mut reference = PixelAccumulator::new();
    for &c in &colors {
        reference.blend(c, 0.8, 0.0);
    }
    let mut prefix = PixelAccumulator::new();
    for &c in &colors[..6] {
        prefix.blend(c, 0.8, 0.0);
    }
    assert_relative_eq!(p.transmittance, prefix.transmittance, max_relative = 1e-5);
    let max_color = 1.0;
    for ch in 0..3 {
        assert_relative_eq!(p.color[ch], prefix.color[ch], max_relative = 1e-5);
        let skipped = reference.color[ch] - p.color[ch];
        assert!(skipped >= 0.0);
        assert!(skipped <= EARLY_STOP_T * max_color, "channel {} skipped {}", ch, skipped);
    }
}

#[test]
fn test_nan_and_zero_alpha_are_clamped() {
    let prims = vec![
        Quad::full(&[0], 16, 16, RED, f32::NAN),
        Quad::full(&[1], 16, 16, BLUE, 0.0),
    ];
    let frame = render(RasterConfig::default(), 16, 16, &prims);
    let min_alpha = octile_core::constants::MIN_ALPHA;
    for p in frame.framebuffer.pixels() {
        assert!(p.color.iter().all(|c| c.is_finite()));
        assert_abs_diff_eq!(p.transmittance, (1.0 - min_alpha) * (1.0 - min_alpha), epsilon = 1e-6);
        assert!(p.color[0] <= min_alpha);
    }
}

#[test]
fn test_partial_sample_coverage() {
    let config = RasterConfig {
        n_samp: 2,
        ..Default::default()
    };
    // Edge at x = 16.5: pixel 16 has one of its two samples inside
    let prims = vec![Quad::new(&[0], (0.0, 0.0), (16.5, 16.0), RED, 0.5)];
    let frame = render(config, 32, 16, &prims);

    let inside = frame.framebuffer.get(15, 4).unwrap();
    assert_relative_eq!(inside.transmittance, 0.5);
    assert_relative_eq!(inside.color[0], 0.5);

    let edge = frame.framebuffer.get(16, 4).unwrap();
    assert_relative_eq!(edge.transmittance, 0.75);
    assert_relative_eq!(edge.color[0], 0.25);

    let outside = frame.framebuffer.get(17, 4).unwrap();
    assert_eq!(outside.transmittance, 1.0);
}

#[test]
fn test_three_samples_at_the_cap() {
    let config = RasterConfig {
        n_samp: MAX_N_SAMP,
        ..Default::default()
    };
    // Samples sit at (1/2, 1/6), (1/6, 5/6) and (5/6, 5/6) of each pixel
    let prims = vec![
        Quad::new(&[0], (0.0, 0.0), (16.4, 48.0), RED, 0.6),
        Quad::new(&[0], (32.0, 0.0), (48.0, 16.5), BLUE, 0.6),
    ];
    let frame = render(config, 48, 48, &prims);

    let inside = frame.framebuffer.get(5, 5).unwrap();
    assert_relative_eq!(inside.transmittance, 0.4, epsilon = 1e-6);
    assert_relative_eq!(inside.color[0], 0.6, epsilon = 1e-6);

    // x edge: only the (1/6, 5/6) sample of column 16 is covered
    let x_edge = frame.framebuffer.get(16, 5).unwrap();
    assert_relative_eq!(x_edge.transmittance, 0.8, epsilon = 1e-6);
    assert_relative_eq!(x_edge.color[0], 0.2, epsilon = 1e-6);

    // y edge: only the (1/2, 1/6) sample of row 16 is covered
    let y_edge = frame.framebuffer.get(40, 16).unwrap();
    assert_relative_eq!(y_edge.transmittance, 0.8, epsilon = 1e-6);
    assert_relative_eq!(y_edge.color[2], 0.2, epsilon = 1e-6);

    assert_eq!(frame.framebuffer.get(17, 5).unwrap().transmittance, 1.0);
    assert_eq!(frame.framebuffer.get(40, 17).unwrap().transmittance, 1.0);
}

#[test]
fn test_sorters_and_pools_agree() {
    let prims: Vec<Quad> = (0..40u8)
        .map(|i| {
            let f = i as f32;
            Quad::new(
                &[i % 8, (i / 8) % 8],
                (f * 1.3, f * 0.7),
                (f * 1.3 + 19.0, f * 0.7 + 23.0),
                Vec3::new(f / 40.0, 0.5, 1.0 - f / 40.0),
                0.35,
            )
        })
        .collect();

    let reference = render(RasterConfig::default(), 70, 50, &prims);

    let radix = Rasterizer::new(RasterConfig::default())
        .unwrap()
        .with_sorter(RadixSorter);
    let grid = radix.grid(70, 50).unwrap();
    let radix_frame = radix.render(&grid, &prims).unwrap();
    assert_eq!(radix.sorter_name(), "radix");
    assert_eq!(radix_frame.pairs, reference.pairs);
    assert_eq!(radix_frame.framebuffer.as_bytes(), reference.framebuffer.as_bytes());

    let pooled = render(
        RasterConfig {
            num_threads: Some(2),
            ..Default::default()
        },
        70,
        50,
        &prims,
    );
    assert_eq!(pooled.framebuffer, reference.framebuffer);
}

#[test]
fn test_depth_output() {
    let prims = vec![
        Quad::full(&[0], 16, 16, RED, 0.5),
        Quad::full(&[0, 0, 0], 16, 16, RED, 0.5),
    ];
    let frame = render(RasterConfig::default(), 16, 16, &prims);
    let p = frame.framebuffer.get(0, 0).unwrap();
    // 0.5 * 1 + 0.25 * 3
    assert_relative_eq!(p.depth, 1.25);
}

#[test]
fn test_grid_mismatch_is_rejected() {
    let raster = Rasterizer::new(RasterConfig::default()).unwrap();
    let other = TileGrid::new(
        32,
        32,
        &RasterConfig {
            block_x: 8,
            block_y: 8,
            ..Default::default()
        },
    )
    .unwrap();
    let prims: Vec<Quad> = Vec::new();
    assert!(matches!(
        raster.render(&other, &prims),
        Err(RasterError::InvalidConfig(_))
    ));
}

#[test]
fn test_foreign_entry_in_tile_range_is_fatal() {
    let config = RasterConfig::default();
    let grid = TileGrid::new(32, 16, &config).unwrap();
    let prims = vec![Quad::full(&[0], 32, 16, RED, 0.5)];
    let pairs = vec![SortPair::new(SortKey::from_parts(1, 0).unwrap(), 0)];
    let bins = vec![TileBin { start: 0, end: 1 }, TileBin::empty_at(1)];

    let err = PerTileCompositor::new(&config, &grid, &pairs, &prims)
        .composite(&bins)
        .unwrap_err();
    assert!(matches!(err, RasterError::TileMismatch { tile: 0, index: 0, key_tile: 1 }));
    assert!(err.is_internal());
}

#[test]
fn test_dangling_primitive_reference_is_fatal() {
    let config = RasterConfig::default();
    let grid = TileGrid::new(16, 16, &config).unwrap();
    let prims = vec![Quad::full(&[0], 16, 16, RED, 0.5)];
    let pairs = vec![SortPair::new(SortKey::from_parts(0, 0).unwrap(), 3)];
    let bins = vec![TileBin { start: 0, end: 1 }];

    let err = PerTileCompositor::new(&config, &grid, &pairs, &prims)
        .composite(&bins)
        .unwrap_err();
    assert!(matches!(err, RasterError::PrimitiveOutOfRange { primitive: 3, .. }));
}

#[test]
fn test_boxed_trait_objects() {
    let prims: Vec<Box<dyn Primitive>> = vec![
        Box::new(Quad::full(&[0], 16, 16, RED, 0.5)),
        Box::new(Quad::full(&[1], 16, 16, BLUE, 0.5)),
    ];
    let raster = Rasterizer::new(RasterConfig::default()).unwrap();
    let grid = raster.grid(16, 16).unwrap();
    let frame = raster.render(&grid, &prims).unwrap();
    assert_relative_eq!(frame.framebuffer.get(1, 1).unwrap().transmittance, 0.25);
}
