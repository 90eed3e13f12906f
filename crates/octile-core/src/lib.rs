//! Shared building blocks for the octile tile rasterizer
//!
//! Holds the build-time constants, the per-frame [`RasterConfig`], the
//! hierarchical [`OctPath`] address every primitive carries, and the
//! [`RasterError`] taxonomy used across the workspace.

pub mod config;
pub mod constants;
pub mod error;
pub mod octree;


pub use config::{OverflowPolicy, RasterConfig};
pub use error::{RasterError, RasterResult};
pub use octree::{octant_mask, OctPath};
