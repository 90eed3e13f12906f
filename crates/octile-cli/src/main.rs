use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use glam::Vec3;
use indicatif::{ProgressBar, ProgressStyle};
use octile_core::constants::MAX_NUM_LEVELS;
use octile_core::RasterConfig;
use octile_raster::{Frame, LevelKeyEncoder, RadixSorter, Rasterizer, TileGrid};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod blob;
mod scene;

use blob::Blob;
use scene::{VoxelPrimitive, VoxelScene};

#[derive(Parser)]
#[command(name = "octile")]
#[command(about = "Sort-based tile rasterizer for hierarchical volumetric scenes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a synthetic scene to PNG
    Render {
        #[command(flatten)]
        scene: SceneArgs,

        #[arg(short, long, default_value = "octile.png")]
        output: PathBuf,

        /// Also write accumulated opacity as a grayscale PNG
        #[arg(long)]
        alpha: Option<PathBuf>,

        /// Dump the raw per-pixel composite results
        #[arg(long)]
        raw: Option<PathBuf>,
    },

    /// Render the same scene repeatedly and report throughput
    Bench {
        #[command(flatten)]
        scene: SceneArgs,

        #[arg(short, long, default_value = "20")]
        frames: usize,
    },

    /// Print the configuration as JSON
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Encode a tile id and rank path into a sort key
    Key {
        #[arg(short, long)]
        tile: u32,

        /// Root-first child indices, e.g. "1,0,7"
        #[arg(short, long, default_value = "")]
        ranks: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SceneKind {
    /// Voxelised spherical shell
    Voxels,
    /// Anisotropic Gaussian cloud
    Blobs,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SorterKind {
    Parallel,
    Radix,
}

#[derive(Args, Clone, Debug)]
struct SceneArgs {
    #[arg(long, default_value = "512")]
    width: u32,

    #[arg(long, default_value = "512")]
    height: u32,

    /// Octree depth of the generated primitives
    #[arg(short, long, default_value = "6")]
    levels: usize,

    #[arg(long, value_enum, default_value = "voxels")]
    scene: SceneKind,

    /// Blob count for the blob scene
    #[arg(long, default_value = "4000")]
    blobs: usize,

    /// View direction as "x,y,z"
    #[arg(long, default_value = "0.4,-0.3,-1", allow_hyphen_values = true)]
    view: String,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sub-pixel samples per primitive
    #[arg(long)]
    samples: Option<u32>,

    /// Worker threads for the frame pool
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long, value_enum, default_value = "parallel")]
    sorter: SorterKind,

    /// Composite over white instead of the configured background
    #[arg(long, default_value = "false")]
    white: bool,
}

/// Scene data plus the primitive views the rasterizer consumes
enum Prepared<'a> {
    Voxels(Vec<VoxelPrimitive<'a>>),
    Blobs(&'a [Blob]),
}

enum Scene {
    Voxels(VoxelScene),
    Blobs(Vec<Blob>),
}

impl Scene {
    fn build(args: &SceneArgs) -> Result<Self> {
        let scene = match args.scene {
            SceneKind::Voxels => {
                let view = parse_vec3(&args.view)?;
                Scene::Voxels(VoxelScene::sphere_shell(args.levels, view, args.width, args.height)?)
            }
            SceneKind::Blobs => Scene::Blobs(blob::blob_cloud(
                args.blobs,
                args.levels,
                args.width,
                args.height,
                args.seed,
            )?),
        };
        Ok(scene)
    }

    fn len(&self) -> usize {
        match self {
            Scene::Voxels(s) => s.voxels.len(),
            Scene::Blobs(b) => b.len(),
        }
    }

    fn prepare(&self) -> Prepared<'_> {
        match self {
            Scene::Voxels(s) => Prepared::Voxels(s.primitives()),
            Scene::Blobs(b) => Prepared::Blobs(b),
        }
    }
}

impl Prepared<'_> {
    fn render(&self, raster: &Rasterizer, grid: &TileGrid) -> Result<Frame> {
        let frame = match self {
            Prepared::Voxels(p) => raster.render(grid, p),
            Prepared::Blobs(p) => raster.render(grid, p),
        };
        frame.context("rasterization failed")
    }
}

fn parse_vec3(s: &str) -> Result<Vec3> {
    let coords: Vec<f32> = s
        .split(',')
        .map(|c| c.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid vector '{}'", s))?;
    if coords.len() != 3 {
        anyhow::bail!("vector must be x,y,z");
    }
    Ok(Vec3::new(coords[0], coords[1], coords[2]))
}

fn parse_ranks(s: &str) -> Result<Vec<u8>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(',')
        .map(|r| r.trim().parse::<u8>().with_context(|| format!("invalid rank '{}'", r)))
        .collect()
}

fn load_config(path: Option<&Path>) -> Result<RasterConfig> {
    match path {
        Some(path) => RasterConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(RasterConfig::default()),
    }
}

fn build_rasterizer(args: &SceneArgs) -> Result<Rasterizer> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(n) = args.samples {
        config.n_samp = n;
    }
    if args.threads.is_some() {
        config.num_threads = args.threads;
    }
    if args.white {
        config.background = [1.0; 3];
    }
    if args.levels > config.max_num_levels as usize {
        anyhow::bail!(
            "--levels {} exceeds max_num_levels {} (hard limit {})",
            args.levels,
            config.max_num_levels,
            MAX_NUM_LEVELS
        );
    }

    let raster = Rasterizer::new(config)?;
    Ok(match args.sorter {
        SorterKind::Parallel => raster,
        SorterKind::Radix => raster.with_sorter(RadixSorter),
    })
}

fn log_frame(frame: &Frame) {
    let s = &frame.stats;
    tracing::info!(
        "{} primitives: {} visible, {} culled, {} clipped, {} rejected",
        s.primitives,
        s.bin.visible,
        s.bin.culled,
        s.bin.clipped,
        s.bin.rejected
    );
    tracing::info!(
        "{} pairs over {} tiles, busiest {:?}, {:.1} entries/pixel, {} pixels saturated",
        s.bin.pairs,
        s.non_empty_tiles,
        s.busiest_tile,
        frame.framebuffer.mean_visited(),
        s.early_stopped
    );
    tracing::info!(
        "bin {:?}, sort {:?}, resolve {:?}, composite {:?} (total {:?})",
        s.timings.bin,
        s.timings.sort,
        s.timings.resolve,
        s.timings.composite,
        s.timings.total()
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            scene: args,
            output,
            alpha,
            raw,
        } => {
            let raster = build_rasterizer(&args)?;
            let grid = raster.grid(args.width, args.height)?;

            let scene = Scene::build(&args)?;
            tracing::info!("Built {:?} scene with {} primitives", args.scene, scene.len());

            let frame = scene.prepare().render(&raster, &grid)?;
            log_frame(&frame);

            let background = Vec3::from(raster.config().background);
            let rgb = image::RgbImage::from_raw(args.width, args.height, frame.framebuffer.to_rgb8(background))
                .ok_or_else(|| anyhow::anyhow!("Failed to create image buffer"))?;
            rgb.save(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {}", output.display());

            if let Some(path) = alpha {
                let gray = image::GrayImage::from_raw(args.width, args.height, frame.framebuffer.alpha_image())
                    .ok_or_else(|| anyhow::anyhow!("Failed to create alpha buffer"))?;
                gray.save(&path)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {}", path.display());
            }

            if let Some(path) = raw {
                std::fs::write(&path, frame.framebuffer.as_bytes())
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Wrote {} ({} bytes)", path.display(), frame.framebuffer.as_bytes().len());
            }
        }

        Commands::Bench { scene: args, frames } => {
            if frames == 0 {
                anyhow::bail!("--frames must be positive");
            }
            let raster = build_rasterizer(&args)?;
            let grid = raster.grid(args.width, args.height)?;
            let scene = Scene::build(&args)?;
            let prepared = scene.prepare();

            println!(
                "Benchmarking {:?} scene: {} primitives, {}x{}, sorter={}",
                args.scene,
                scene.len(),
                args.width,
                args.height,
                raster.sorter_name()
            );

            // Warm-up frame, not timed
            let mut last = prepared.render(&raster, &grid)?;

            let pb = ProgressBar::new(frames as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed}] [{bar:30}] {pos}/{len} {msg}")
                    .context("progress template")?,
            );

            let mut busy = Duration::ZERO;
            let start = Instant::now();
            for _ in 0..frames {
                last = prepared.render(&raster, &grid)?;
                busy += last.stats.timings.total();
                pb.set_message(format!("{:.1} ms", last.stats.timings.total().as_secs_f64() * 1e3));
                pb.inc(1);
            }
            let wall = start.elapsed();
            pb.finish_and_clear();

            log_frame(&last);
            println!(
                "{} frames in {:.2?}: {:.1} FPS ({:.2} ms/frame in pipeline)",
                frames,
                wall,
                frames as f64 / wall.as_secs_f64(),
                busy.as_secs_f64() * 1e3 / frames as f64
            );
        }

        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_json()?);
        }

        Commands::Key { tile, ranks } => {
            let ranks = parse_ranks(&ranks)?;
            let encoder = LevelKeyEncoder::new(&RasterConfig::default());
            let key = encoder.encode(&ranks, tile)?;
            println!("Key:        {}", key);
            println!("Tile:       {}", key.tile_id());
            println!("Order rank: {:#014x} ({:048b})", key.order_rank(), key.order_rank());
            println!("Ranks:      {:?}", ranks);
        }
    }

    Ok(())
}
