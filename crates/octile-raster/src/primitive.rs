//! Contract with the scene collaborator
//!
//! The pipeline never looks inside a primitive. It asks for the hierarchical
//! address (for ordering), the projected screen footprint (for binning) and
//! a per-position evaluation (for compositing).

use glam::{Vec2, Vec3};
use octile_core::OctPath;

/// Axis-aligned screen-space bounds in pixels, both corners inclusive
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Footprint {
    pub min: Vec2,
    pub max: Vec2,
}

impl Footprint {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Square bounds of a disc
    pub fn from_center_radius(center: Vec2, radius: f32) -> Self {
        Self {
            min: center - Vec2::splat(radius),
            max: center + Vec2::splat(radius),
        }
    }

    /// Finite and non-inverted
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min.cmple(self.max).all()
    }
}

/// What one primitive contributes at one sample position
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contribution {
    pub color: Vec3,
    /// Opacity before clamping
    pub alpha: f32,
    /// Distance along the view ray, used for the depth output only
    pub depth: f32,
}

impl Contribution {
    pub fn new(color: Vec3, alpha: f32) -> Self {
        Self {
            color,
            alpha,
            depth: 0.0,
        }
    }

    pub fn with_depth(mut self, depth: f32) -> Self {
        self.depth = depth;
        self
    }
}

/// Per-evaluation parameters supplied by the compositor
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvalContext {
    pub tile_id: u32,
    /// Index of this sample, `0..n_samp`
    pub sample: u32,
    pub n_samp: u32,
    /// Step multiplier for any ray marching done by the evaluator
    pub step_sz_scale: f32,
}

/// A volumetric primitive as seen by the rasterizer
///
/// Implementations must be pure: the same inputs always give the same
/// output, and evaluation may run concurrently from many threads.
pub trait Primitive: Sync {
    /// Position in the hierarchy, already ordered for the current view
    fn address(&self) -> OctPath;

    /// Projected screen bounds; `None` culls the primitive
    fn footprint(&self) -> Option<Footprint>;

    /// Color and opacity at a screen position, `None` if not covered
    fn evaluate(&self, position: Vec2, ctx: &EvalContext) -> Option<Contribution>;
}

impl<P: Primitive + ?Sized> Primitive for &P {
    fn address(&self) -> OctPath {
        (**self).address()
    }

    fn footprint(&self) -> Option<Footprint> {
        (**self).footprint()
    }

    fn evaluate(&self, position: Vec2, ctx: &EvalContext) -> Option<Contribution> {
        (**self).evaluate(position, ctx)
    }
}

impl<P: Primitive + ?Sized> Primitive for Box<P> {
    fn address(&self) -> OctPath {
        (**self).address()
    }

    fn footprint(&self) -> Option<Footprint> {
        (**self).footprint()
    }

    fn evaluate(&self, position: Vec2, ctx: &EvalContext) -> Option<Contribution> {
        (**self).evaluate(position, ctx)
    }
}
