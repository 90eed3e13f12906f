//! Hierarchical primitive addresses
//!
//! A primitive sits at some depth of an octree-like hierarchy with at most
//! [`MAX_NUM_LEVELS`] levels. Its address is the sequence of child indices
//! taken from the root, each in `[0, 8)`.
//!
//! # Bit layout
//!
//! Ranks are packed most-significant-level first into the low
//! [`NUM_BIT_ORDER_RANK`] bits of a `u64`: the root level's child index
//! occupies bits 47..45, the next level bits 44..42, and so on. Levels
//! deeper than the address are zero-filled. Comparing packed paths as
//! integers therefore orders primitives by their hierarchical position.
//!
//! Serialized form is the root-first rank list, so a deserialized path goes
//! through the same checks as [`OctPath::from_ranks`].

use crate::constants::{MAX_NUM_LEVELS, NUM_BIT_ORDER_RANK, NUM_BIT_PER_LEVEL};
use crate::error::{RasterError, RasterResult};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;

const RANK_MASK: u64 = 0b111;

/// Packed per-level child indices plus the number of levels in use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct OctPath {
    path: u64,
    depth: u8,
}

#[inline]
fn level_shift(level: usize) -> u32 {
    NUM_BIT_ORDER_RANK - NUM_BIT_PER_LEVEL * (level as u32 + 1)
}

impl OctPath {
    /// The hierarchy root (no ranks)
    pub const fn root() -> Self {
        Self { path: 0, depth: 0 }
    }

    /// Pack a root-first rank sequence
    pub fn from_ranks(ranks: &[u8]) -> RasterResult<Self> {
        if ranks.len() > MAX_NUM_LEVELS as usize {
            return Err(RasterError::TooManyLevels {
                depth: ranks.len(),
                max: MAX_NUM_LEVELS,
            });
        }
        let mut path = 0u64;
        for (level, &rank) in ranks.iter().enumerate() {
            if rank as u64 > RANK_MASK {
                return Err(RasterError::RankOverflow {
                    level,
                    rank: rank as u32,
                });
            }
            path |= (rank as u64) << level_shift(level);
        }
        Ok(Self {
            path,
            depth: ranks.len() as u8,
        })
    }

    /// Check the packing invariants: depth within the cap, nothing above
    /// the rank field and zeros in every level past `depth`
    pub fn validate(&self) -> RasterResult<()> {
        if self.depth() > MAX_NUM_LEVELS as usize {
            return Err(RasterError::TooManyLevels {
                depth: self.depth(),
                max: MAX_NUM_LEVELS,
            });
        }
        let overflow = self.path >> NUM_BIT_ORDER_RANK;
        if overflow != 0 {
            return Err(RasterError::RankOverflow {
                level: MAX_NUM_LEVELS as usize,
                rank: overflow as u32,
            });
        }
        let used_bits = NUM_BIT_PER_LEVEL * self.depth as u32;
        let unused = self.path & ((1u64 << (NUM_BIT_ORDER_RANK - used_bits)) - 1);
        if unused != 0 {
            return Err(RasterError::UnusedLevelBits {
                depth: self.depth(),
                bits: unused,
            });
        }
        Ok(())
    }

    /// Number of levels below the root
    pub fn depth(&self) -> usize {
        self.depth as usize
    }

    /// The packed 48-bit order rank
    pub fn bits(&self) -> u64 {
        self.path
    }

    /// Child index taken at `level`, if the address is that deep
    pub fn rank(&self, level: usize) -> Option<u8> {
        if level >= self.depth() {
            return None;
        }
        Some(((self.path >> level_shift(level)) & RANK_MASK) as u8)
    }

    /// Root-first rank sequence
    pub fn ranks(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.depth()).filter_map(move |level| self.rank(level))
    }

    pub fn child(&self, rank: u8) -> RasterResult<Self> {
        let level = self.depth();
        if level >= MAX_NUM_LEVELS as usize {
            return Err(RasterError::TooManyLevels {
                depth: level + 1,
                max: MAX_NUM_LEVELS,
            });
        }
        if rank as u64 > RANK_MASK {
            return Err(RasterError::RankOverflow {
                level,
                rank: rank as u32,
            });
        }
        Ok(Self {
            path: self.path | ((rank as u64) << level_shift(level)),
            depth: self.depth + 1,
        })
    }

    pub fn parent(&self) -> Option<Self> {
        let level = self.depth().checked_sub(1)?;
        Some(Self {
            path: self.path & !(RANK_MASK << level_shift(level)),
            depth: self.depth - 1,
        })
    }

    /// Strict ancestor test
    pub fn is_ancestor_of(&self, other: &OctPath) -> bool {
        if self.depth >= other.depth {
            return false;
        }
        let prefix_bits = NUM_BIT_PER_LEVEL * self.depth as u32;
        if prefix_bits == 0 {
            return true;
        }
        let mask = ((1u64 << prefix_bits) - 1) << (NUM_BIT_ORDER_RANK - prefix_bits);
        (self.path & mask) == (other.path & mask)
    }

    /// Reorder siblings for a viewing direction
    ///
    /// Every level's child index is XORed with `octant_mask`, so the child
    /// nearest to a viewer looking along a ray in that octant receives rank 0.
    /// The permutation is an involution; applying it twice restores the path.
    pub fn view_ordered(&self, octant_mask: u8) -> Self {
        let mask = (octant_mask as u64) & RANK_MASK;
        let mut pattern = 0u64;
        for level in 0..self.depth() {
            pattern |= mask << level_shift(level);
        }
        Self {
            path: self.path ^ pattern,
            depth: self.depth,
        }
    }

    /// Centre and edge length of the addressed cell
    ///
    /// The root cell is the cube of edge `scene_extent` centred on
    /// `scene_center`. Bit 0, 1 and 2 of a child index select the positive
    /// half along x, y and z respectively.
    pub fn decode(&self, scene_center: Vec3, scene_extent: f32) -> (Vec3, f32) {
        let mut center = scene_center;
        let mut size = scene_extent;
        for rank in self.ranks() {
            size *= 0.5;
            let half = size * 0.5;
            let sign = |bit: u8| if rank & bit != 0 { half } else { -half };
            center += Vec3::new(sign(0b001), sign(0b010), sign(0b100));
        }
        (center, size)
    }

    /// Address of the depth-`depth` cell containing `point`
    ///
    /// Points outside the root cube land in the nearest boundary cell.
    pub fn locate(point: Vec3, scene_center: Vec3, scene_extent: f32, depth: usize) -> RasterResult<Self> {
        if depth > MAX_NUM_LEVELS as usize {
            return Err(RasterError::TooManyLevels {
                depth,
                max: MAX_NUM_LEVELS,
            });
        }
        let mut path = Self::root();
        let mut center = scene_center;
        let mut half = scene_extent * 0.5;
        for _ in 0..depth {
            half *= 0.5;
            let mut rank = 0u8;
            let mut step = Vec3::splat(-half);
            for axis in 0..3 {
                if point[axis] >= center[axis] {
                    rank |= 1 << axis;
                    step[axis] = half;
                }
            }
            center += step;
            path = path.child(rank)?;
        }
        Ok(path)
    }
}

impl TryFrom<Vec<u8>> for OctPath {
    type Error = RasterError;

    fn try_from(ranks: Vec<u8>) -> RasterResult<Self> {
        Self::from_ranks(&ranks)
    }
}

impl From<OctPath> for Vec<u8> {
    fn from(path: OctPath) -> Self {
        path.ranks().collect()
    }
}

impl fmt::Display for OctPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, rank) in self.ranks().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", rank)?;
        }
        write!(f, "]")
    }
}

/// Child-index permutation for a ray direction
///
/// Bit `k` is set when component `k` of `ray_dir` is negative, i.e. when the
/// positive-side child along that axis is the nearer one.
pub fn octant_mask(ray_dir: Vec3) -> u8 {
    let mut mask = 0u8;
    if ray_dir.x < 0.0 {
        mask |= 0b001;
    }
    if ray_dir.y < 0.0 {
        mask |= 0b010;
    }
    if ray_dir.z < 0.0 {
        mask |= 0b100;
    }
    mask
}
