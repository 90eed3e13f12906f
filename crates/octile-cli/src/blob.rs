//! Anisotropic Gaussian blobs
//!
//! Screen-space 2D Gaussians addressed by the octree cell of their 3D
//! centre. Useful for exercising heavy tile overlap and soft falloff.

use glam::{Mat2, Vec2, Vec3};
use octile_core::{octant_mask, OctPath};
use octile_raster::{Contribution, EvalContext, Footprint, Primitive};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Below this weight a blob is treated as not covering the sample
const MIN_WEIGHT: f32 = 1.0 / 255.0;

/// 2x2 screen covariance from axis scales and a rotation angle
///
/// `Σ = R S Sᵀ Rᵀ`
pub fn covariance_2d(scale: Vec2, angle: f32) -> Mat2 {
    let r = Mat2::from_angle(angle);
    let rs = Mat2::from_cols(r.col(0) * scale.x, r.col(1) * scale.y);
    rs * rs.transpose()
}

/// Add `filter` to the diagonal so every blob covers at least part of a pixel
pub fn apply_low_pass_filter(cov: Mat2, filter: f32) -> Mat2 {
    cov + Mat2::from_diagonal(Vec2::splat(filter))
}

/// Inverse covariance packed as `(a, b, c)` for
/// `G(d) = exp(-0.5 (a dx² + 2 b dx dy + c dy²))`
///
/// `None` for degenerate covariances.
pub fn covariance_to_conic(cov: Mat2) -> Option<Vec3> {
    let det = cov.determinant();
    if det <= 1e-6 {
        return None;
    }
    let inv = 1.0 / det;
    Some(Vec3::new(cov.col(1).y * inv, -cov.col(1).x * inv, cov.col(0).x * inv))
}

/// `(λ_max, λ_min)` of a symmetric 2x2 matrix
pub fn eigenvalues_2x2(cov: Mat2) -> (f32, f32) {
    let a = cov.col(0).x;
    let b = cov.col(1).x;
    let c = cov.col(1).y;
    let half_trace = (a + c) * 0.5;
    let disc = (half_trace * half_trace - (a * c - b * b)).max(0.0).sqrt();
    (half_trace + disc, half_trace - disc)
}

/// Three standard deviations along the major axis
pub fn bounding_radius(cov: Mat2) -> f32 {
    let (lambda_max, _) = eigenvalues_2x2(cov);
    3.0 * lambda_max.max(0.0).sqrt()
}

#[derive(Clone, Copy, Debug)]
pub struct Blob {
    pub address: OctPath,
    pub center: Vec2,
    pub conic: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub opacity: f32,
    pub depth: f32,
}

impl Blob {
    pub fn new(address: OctPath, center: Vec2, cov: Mat2, color: Vec3, opacity: f32, depth: f32) -> Option<Self> {
        let cov = apply_low_pass_filter(cov, 0.3);
        let conic = covariance_to_conic(cov)?;
        Some(Self {
            address,
            center,
            conic,
            radius: bounding_radius(cov),
            color,
            opacity,
            depth,
        })
    }

    #[inline]
    fn weight(&self, position: Vec2) -> f32 {
        let d = position - self.center;
        let power = -0.5 * (self.conic.x * d.x * d.x + 2.0 * self.conic.y * d.x * d.y + self.conic.z * d.y * d.y);
        if power > 0.0 {
            return 0.0;
        }
        power.exp()
    }
}

impl Primitive for Blob {
    fn address(&self) -> OctPath {
        self.address
    }

    fn footprint(&self) -> Option<Footprint> {
        Some(Footprint::from_center_radius(self.center, self.radius))
    }

    fn evaluate(&self, position: Vec2, _ctx: &EvalContext) -> Option<Contribution> {
        let alpha = self.opacity * self.weight(position);
        if alpha < MIN_WEIGHT {
            return None;
        }
        Some(Contribution::new(self.color, alpha).with_depth(self.depth))
    }
}

/// Pseudo-random blob cloud filling the viewport
///
/// Blobs are scattered through a unit cube viewed down +z, addressed at
/// `levels` depth so nearer blobs sort first.
pub fn blob_cloud(count: usize, levels: usize, width: u32, height: u32, seed: u64) -> anyhow::Result<Vec<Blob>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mask = octant_mask(Vec3::Z);
    let scale = width.min(height) as f32;
    let mut blobs = Vec::with_capacity(count);

    for _ in 0..count {
        let p = Vec3::new(rng.random(), rng.random(), rng.random()) - Vec3::splat(0.5);
        let address = OctPath::locate(p, Vec3::ZERO, 1.0, levels)?.view_ordered(mask);

        let center = Vec2::new(
            width as f32 * 0.5 + p.x * width as f32,
            height as f32 * 0.5 - p.y * height as f32,
        );
        let axes = Vec2::new(0.005 + 0.03 * rng.random::<f32>(), 0.005 + 0.015 * rng.random::<f32>()) * scale;
        let cov = covariance_2d(axes, rng.random::<f32>() * std::f32::consts::PI);
        let color = Vec3::new(rng.random(), rng.random(), rng.random());
        let opacity = 0.3 + 0.7 * rng.random::<f32>();

        if let Some(blob) = Blob::new(address, center, cov, color, opacity, p.z + 0.5) {
            blobs.push(blob);
        }
    }
    Ok(blobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scaled_covariance() {
        let cov = covariance_2d(Vec2::new(2.0, 0.5), 0.0);
        assert_relative_eq!(cov.col(0).x, 4.0, epsilon = 1e-6);
        assert_relative_eq!(cov.col(1).y, 0.25, epsilon = 1e-6);
        assert_relative_eq!(cov.col(1).x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_keeps_eigenvalues() {
        let cov = covariance_2d(Vec2::new(3.0, 1.0), 0.7);
        let (l1, l2) = eigenvalues_2x2(cov);
        assert_relative_eq!(l1, 9.0, epsilon = 1e-4);
        assert_relative_eq!(l2, 1.0, epsilon = 1e-4);
        assert_relative_eq!(bounding_radius(cov), 9.0, epsilon = 1e-4);
    }

    #[test]
    fn test_conic_inversion() {
        let conic = covariance_to_conic(Mat2::from_diagonal(Vec2::new(4.0, 1.0))).unwrap();
        assert_relative_eq!(conic.x, 0.25, epsilon = 1e-6);
        assert_relative_eq!(conic.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(conic.z, 1.0, epsilon = 1e-6);
        assert!(covariance_to_conic(Mat2::ZERO).is_none());
    }

    #[test]
    fn test_blob_falloff() {
        let cov = Mat2::from_diagonal(Vec2::splat(3.7));
        let blob = Blob::new(OctPath::root(), Vec2::new(10.0, 10.0), cov, Vec3::ONE, 0.8, 0.0).unwrap();
        let ctx = EvalContext {
            tile_id: 0,
            sample: 0,
            n_samp: 1,
            step_sz_scale: 100.0,
        };
        let peak = blob.evaluate(Vec2::new(10.0, 10.0), &ctx).unwrap();
        assert_relative_eq!(peak.alpha, 0.8);
        // One sigma out (variance 4 after filtering)
        let side = blob.evaluate(Vec2::new(12.0, 10.0), &ctx).unwrap();
        assert_relative_eq!(side.alpha, 0.8 * (-0.5f32).exp(), epsilon = 1e-5);
        assert!(blob.evaluate(Vec2::new(40.0, 10.0), &ctx).is_none());
        assert_relative_eq!(blob.radius, 6.0, epsilon = 1e-5);
    }

    #[test]
    fn test_cloud_is_deterministic() {
        let a = blob_cloud(50, 4, 64, 64, 7).unwrap();
        let b = blob_cloud(50, 4, 64, 64, 7).unwrap();
        assert_eq!(a.len(), 50);
        assert!(a.iter().zip(&b).all(|(x, y)| x.address == y.address && x.center == y.center));
        assert!(a.iter().all(|blob| blob.address.depth() == 4));
    }
}
