//! Synthetic sparse-voxel scene
//!
//! A spherical shell voxelised to a fixed octree depth, viewed through an
//! orthographic camera. Each voxel stores densities at its eight corners and
//! is rendered by marching the view ray through its box.

use glam::{Vec2, Vec3};
use octile_core::constants::STEP_SZ_SCALE;
use octile_core::{octant_mask, OctPath};
use octile_raster::{Contribution, EvalContext, Footprint, Primitive};

/// Midpoint quadrature steps per voxel crossing
const MARCH_STEPS: usize = 4;

/// Optical depth across one leaf voxel at peak density
const LEAF_OPTICAL_DEPTH: f32 = 1.5;

#[derive(Clone, Copy, Debug)]
pub struct OrthoCamera {
    pub target: Vec3,
    /// Unit viewing direction
    pub dir: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// Pixels per world unit
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    /// Distance from the image plane to `target`
    pub near: f32,
}

impl OrthoCamera {
    /// Camera looking along `view_dir` at `target`, fitting `view_extent`
    /// world units into the shorter image side
    pub fn new(target: Vec3, view_dir: Vec3, view_extent: f32, width: u32, height: u32) -> anyhow::Result<Self> {
        let dir = view_dir
            .try_normalize()
            .ok_or_else(|| anyhow::anyhow!("view direction must be non-zero and finite"))?;
        if view_extent <= 0.0 || width == 0 || height == 0 {
            anyhow::bail!("camera needs a positive extent and image size");
        }
        let hint = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
        let right = dir.cross(hint).normalize();
        let up = right.cross(dir);
        Ok(Self {
            target,
            dir,
            right,
            up,
            scale: width.min(height) as f32 / view_extent,
            width,
            height,
            near: view_extent,
        })
    }

    fn half_size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32) * 0.5
    }

    /// World point to pixel coordinates
    pub fn project(&self, point: Vec3) -> Vec2 {
        let d = point - self.target;
        self.half_size() + Vec2::new(d.dot(self.right), -d.dot(self.up)) * self.scale
    }

    /// Origin on the image plane of the ray through `pixel`
    pub fn ray_origin(&self, pixel: Vec2) -> Vec3 {
        let p = (pixel - self.half_size()) / self.scale;
        self.target + self.right * p.x - self.up * p.y - self.dir * self.near
    }

    /// Screen bounds of an axis-aligned cube
    pub fn footprint(&self, center: Vec3, half: f32) -> Footprint {
        let c = self.project(center);
        let extent = Vec2::new(self.right.abs().element_sum(), self.up.abs().element_sum()) * half * self.scale;
        Footprint::new(c - extent, c + extent)
    }
}

#[derive(Clone, Debug)]
pub struct Voxel {
    pub path: OctPath,
    pub center: Vec3,
    pub size: f32,
    /// Corner densities; bit 0/1/2 of the index selects the +x/+y/+z corner
    pub density: [f32; 8],
    pub color: Vec3,
}

impl Voxel {
    /// Trilinear density at `local` in `[0, 1]^3`
    fn density_at(&self, local: Vec3) -> f32 {
        let mut sum = 0.0;
        for (corner, &d) in self.density.iter().enumerate() {
            let w = |bit: usize, t: f32| if corner & bit != 0 { t } else { 1.0 - t };
            sum += d * w(1, local.x) * w(2, local.y) * w(4, local.z);
        }
        sum
    }
}

pub struct VoxelScene {
    pub camera: OrthoCamera,
    pub center: Vec3,
    pub extent: f32,
    pub voxels: Vec<Voxel>,
}

impl VoxelScene {
    /// Voxelise a spherical shell at octree depth `levels`
    pub fn sphere_shell(levels: usize, view_dir: Vec3, width: u32, height: u32) -> anyhow::Result<Self> {
        let center = Vec3::ZERO;
        let extent = 2.0;
        let radius = 0.7;
        let leaf = extent / (1u64 << levels) as f32;
        let thickness = (2.0 * leaf).max(0.05);
        let peak = LEAF_OPTICAL_DEPTH * (1u64 << levels) as f32 / STEP_SZ_SCALE;

        let field = |p: Vec3| peak * (1.0 - ((p - center).length() - radius).abs() / thickness).max(0.0);

        let mut voxels = Vec::new();
        let mut stack = vec![OctPath::root()];
        while let Some(path) = stack.pop() {
            let (c, size) = path.decode(center, extent);
            let reach = thickness + size * 0.5 * 3f32.sqrt();
            if ((c - center).length() - radius).abs() > reach {
                continue;
            }
            if path.depth() < levels {
                for rank in (0..8).rev() {
                    stack.push(path.child(rank)?);
                }
                continue;
            }

            let half = size * 0.5;
            let density: [f32; 8] = std::array::from_fn(|corner| {
                let sign = |bit: usize| if corner & bit != 0 { half } else { -half };
                field(c + Vec3::new(sign(1), sign(2), sign(4)))
            });
            if density.iter().all(|&d| d <= 0.0) {
                continue;
            }
            voxels.push(Voxel {
                path,
                center: c,
                size,
                density,
                color: Vec3::splat(0.5) + 0.5 * (c - center).normalize_or_zero(),
            });
        }

        let camera = OrthoCamera::new(center, view_dir, extent * 1.2, width, height)?;
        tracing::debug!("Voxelised shell: {} voxels at depth {}", voxels.len(), levels);
        Ok(Self {
            camera,
            center,
            extent,
            voxels,
        })
    }

    /// Rasterizer view of the voxels, addressed for the camera direction
    pub fn primitives(&self) -> Vec<VoxelPrimitive<'_>> {
        let mask = octant_mask(self.camera.dir);
        self.voxels
            .iter()
            .map(|voxel| VoxelPrimitive {
                scene: self,
                voxel,
                address: voxel.path.view_ordered(mask),
            })
            .collect()
    }
}

pub struct VoxelPrimitive<'a> {
    scene: &'a VoxelScene,
    voxel: &'a Voxel,
    address: OctPath,
}

impl VoxelPrimitive<'_> {
    pub fn voxel(&self) -> &Voxel {
        self.voxel
    }
}

impl Primitive for VoxelPrimitive<'_> {
    fn address(&self) -> OctPath {
        self.address
    }

    fn footprint(&self) -> Option<Footprint> {
        Some(self.scene.camera.footprint(self.voxel.center, self.voxel.size * 0.5))
    }

    fn evaluate(&self, position: Vec2, ctx: &EvalContext) -> Option<Contribution> {
        let camera = &self.scene.camera;
        let origin = camera.ray_origin(position);
        let half = Vec3::splat(self.voxel.size * 0.5);
        let lo = self.voxel.center - half;

        // Slab test
        let inv = camera.dir.recip();
        let t0 = (lo - origin) * inv;
        let t1 = (lo + 2.0 * half - origin) * inv;
        let t_near = t0.min(t1).max_element().max(0.0);
        let t_far = t0.max(t1).min_element();
        if t_far.is_nan() || t_far <= t_near {
            return None;
        }

        let step = (t_far - t_near) / MARCH_STEPS as f32;
        let mut density_sum = 0.0;
        for i in 0..MARCH_STEPS {
            let p = origin + camera.dir * (t_near + (i as f32 + 0.5) * step);
            let local = ((p - lo) / self.voxel.size).clamp(Vec3::ZERO, Vec3::ONE);
            density_sum += self.voxel.density_at(local);
        }
        let optical_depth = density_sum * step / self.scene.extent * ctx.step_sz_scale;
        if optical_depth <= 0.0 {
            return None;
        }

        let alpha = 1.0 - (-optical_depth).exp();
        let depth = 0.5 * (t_near + t_far) - camera.near;
        Some(Contribution::new(self.voxel.color, alpha).with_depth(depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use octile_core::RasterConfig;
    use octile_raster::Rasterizer;

    #[test]
    fn test_camera_round_trip() {
        let camera = OrthoCamera::new(Vec3::ZERO, Vec3::new(0.3, -0.2, -1.0), 2.0, 64, 32).unwrap();
        let pixel = Vec2::new(10.0, 20.0);
        let origin = camera.ray_origin(pixel);
        let back = camera.project(origin + camera.dir * 1.7);
        assert_relative_eq!(back.x, pixel.x, epsilon = 1e-3);
        assert_relative_eq!(back.y, pixel.y, epsilon = 1e-3);
        assert_relative_eq!(camera.project(Vec3::ZERO).x, 32.0);
        assert!(OrthoCamera::new(Vec3::ZERO, Vec3::ZERO, 2.0, 64, 32).is_err());
    }

    #[test]
    fn test_shell_voxels_hug_radius() {
        let scene = VoxelScene::sphere_shell(4, Vec3::NEG_Z, 64, 64).unwrap();
        assert!(!scene.voxels.is_empty());
        for v in &scene.voxels {
            assert_eq!(v.path.depth(), 4);
            assert_relative_eq!(v.size, 0.125);
            assert!((v.center.length() - 0.7).abs() < 0.4);
        }
    }

    #[test]
    fn test_shell_renders_ring() {
        let scene = VoxelScene::sphere_shell(5, Vec3::NEG_Z, 64, 64).unwrap();
        let prims = scene.primitives();
        let raster = Rasterizer::new(RasterConfig::default()).unwrap();
        let grid = raster.grid(64, 64).unwrap();
        let frame = raster.render(&grid, &prims).unwrap();

        // Through the centre the ray crosses the shell twice
        let centre = frame.framebuffer.get(32, 32).unwrap();
        assert!(centre.transmittance < 0.9);
        let corner = frame.framebuffer.get(0, 0).unwrap();
        assert_eq!(corner.transmittance, 1.0);
        assert!(frame.stats.bin.pairs >= prims.len());
    }

    #[test]
    fn test_view_order_is_near_first() {
        let scene = VoxelScene::sphere_shell(4, Vec3::NEG_Z, 64, 64).unwrap();
        let prims = scene.primitives();
        let raster = Rasterizer::new(RasterConfig::default()).unwrap();
        let grid = raster.grid(64, 64).unwrap();
        let frame = raster.render(&grid, &prims).unwrap();

        let centre_tile = grid.tile_id(2, 2) as usize;
        let entries = &frame.pairs[frame.bins[centre_tile].range()];
        let first = prims[entries[0].primitive as usize].voxel();
        let last = prims[entries[entries.len() - 1].primitive as usize].voxel();
        // Looking down -z, the viewer sits at +z
        assert!(first.center.z > last.center.z);
    }
}
