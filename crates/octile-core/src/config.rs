//! Frame configuration threaded through every pipeline stage

use crate::constants::*;
use crate::error::{RasterError, RasterResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the binner does with a primitive that overlaps more tiles than
/// [`RasterConfig::max_tiles_per_primitive`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Keep the first `max_tiles_per_primitive` tiles in row-major order
    #[default]
    Clip,
    /// Drop the primitive for this frame
    Reject,
}

/// Immutable rasterizer configuration
///
/// Defaults mirror the build-time constants in [`crate::constants`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Tile width in pixels
    pub block_x: u32,
    /// Tile height in pixels
    pub block_y: u32,
    /// Deepest hierarchy level a primitive may sit at
    pub max_num_levels: u32,
    /// Lower opacity clamp
    pub min_alpha: f32,
    /// Upper opacity clamp
    pub max_alpha: f32,
    /// Early-ray-termination threshold on transmittance
    pub early_stop_t: f32,
    /// Ray-marching step multiplier for primitive evaluation
    pub step_sz_scale: f32,
    /// Evaluations combined per primitive-pixel pair, `1..=MAX_N_SAMP`
    pub n_samp: u32,
    /// Cap on tiles a single primitive may be binned into
    pub max_tiles_per_primitive: Option<u32>,
    pub overflow_policy: OverflowPolicy,
    /// Linear RGB shown through the remaining transmittance
    pub background: [f32; 3],
    /// Worker threads for the phase pool; `None` uses the global rayon pool
    pub num_threads: Option<usize>,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            block_x: BLOCK_X,
            block_y: BLOCK_Y,
            max_num_levels: MAX_NUM_LEVELS,
            min_alpha: MIN_ALPHA,
            max_alpha: MAX_ALPHA,
            early_stop_t: EARLY_STOP_T,
            step_sz_scale: STEP_SZ_SCALE,
            n_samp: 1,
            max_tiles_per_primitive: None,
            overflow_policy: OverflowPolicy::Clip,
            background: [0.0; 3],
            num_threads: None,
        }
    }
}

impl RasterConfig {
    /// Default configuration over a white background
    pub fn white_background() -> Self {
        Self {
            background: [1.0; 3],
            ..Self::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> RasterResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RasterResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Pixels per tile
    pub fn block_size(&self) -> u32 {
        self.block_x * self.block_y
    }

    /// Clamp an opacity into `[min_alpha, max_alpha]`; NaN maps to `min_alpha`
    #[inline]
    pub fn clamp_alpha(&self, alpha: f32) -> f32 {
        if alpha.is_nan() {
            return self.min_alpha;
        }
        alpha.clamp(self.min_alpha, self.max_alpha)
    }

    pub fn validate(&self) -> RasterResult<()> {
        if self.block_x == 0 || self.block_y == 0 {
            return Err(invalid(format!(
                "tile dimensions must be positive, got {}x{}",
                self.block_x, self.block_y
            )));
        }
        if self.block_x.saturating_mul(self.block_y) > MAX_BLOCK_SIZE {
            return Err(invalid(format!(
                "{}x{} tiles exceed {} pixels per tile",
                self.block_x, self.block_y, MAX_BLOCK_SIZE
            )));
        }
        if self.max_num_levels == 0 || self.max_num_levels > MAX_NUM_LEVELS {
            return Err(invalid(format!(
                "max_num_levels must be in 1..={}, got {}",
                MAX_NUM_LEVELS, self.max_num_levels
            )));
        }
        if !(self.min_alpha > 0.0 && self.min_alpha < self.max_alpha && self.max_alpha < 1.0) {
            return Err(invalid(format!(
                "alpha bounds must satisfy 0 < min < max < 1, got [{}, {}]",
                self.min_alpha, self.max_alpha
            )));
        }
        if !(self.early_stop_t > 0.0 && self.early_stop_t < 1.0) {
            return Err(invalid(format!(
                "early_stop_t must be in (0, 1), got {}",
                self.early_stop_t
            )));
        }
        if !(self.step_sz_scale > 0.0 && self.step_sz_scale.is_finite()) {
            return Err(invalid(format!(
                "step_sz_scale must be positive, got {}",
                self.step_sz_scale
            )));
        }
        if self.n_samp == 0 || self.n_samp > MAX_N_SAMP {
            return Err(invalid(format!(
                "n_samp must be in 1..={}, got {}",
                MAX_N_SAMP, self.n_samp
            )));
        }
        if self.max_tiles_per_primitive == Some(0) {
            return Err(invalid("max_tiles_per_primitive must be positive".into()));
        }
        if self.num_threads == Some(0) {
            return Err(invalid("num_threads must be positive".into()));
        }
        if self.background.iter().any(|c| !c.is_finite()) {
            return Err(invalid(format!("background must be finite, got {:?}", self.background)));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> RasterError {
    RasterError::InvalidConfig(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constants() {
        let config = RasterConfig::default();
        assert_eq!(config.block_size(), BLOCK_SIZE);
        assert_eq!(config.max_num_levels, 16);
        assert_eq!(config.min_alpha, 0.00001);
        assert_eq!(config.max_alpha, 0.99999);
        assert_eq!(config.early_stop_t, 0.0001);
        assert_eq!(config.step_sz_scale, 100.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_clamp_alpha() {
        let config = RasterConfig::default();
        assert_eq!(config.clamp_alpha(0.0), MIN_ALPHA);
        assert_eq!(config.clamp_alpha(1.5), MAX_ALPHA);
        assert_eq!(config.clamp_alpha(0.5), 0.5);
        assert_eq!(config.clamp_alpha(f32::NAN), MIN_ALPHA);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            RasterConfig { block_x: 0, ..Default::default() },
            RasterConfig { block_x: 64, block_y: 64, ..Default::default() },
            RasterConfig { max_num_levels: 17, ..Default::default() },
            RasterConfig { min_alpha: 0.5, max_alpha: 0.4, ..Default::default() },
            RasterConfig { max_alpha: 1.0, ..Default::default() },
            RasterConfig { early_stop_t: 0.0, ..Default::default() },
            RasterConfig { step_sz_scale: -1.0, ..Default::default() },
            RasterConfig { n_samp: 4, ..Default::default() },
            RasterConfig { n_samp: 0, ..Default::default() },
            RasterConfig { max_tiles_per_primitive: Some(0), ..Default::default() },
            RasterConfig { num_threads: Some(0), ..Default::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(RasterError::InvalidConfig(_))),
                "accepted {:?}",
                config
            );
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RasterConfig =
            serde_json::from_str(r#"{ "n_samp": 3, "overflow_policy": "reject" }"#).unwrap();
        assert_eq!(config.n_samp, 3);
        assert_eq!(config.overflow_policy, OverflowPolicy::Reject);
        assert_eq!(config.block_x, BLOCK_X);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let config = RasterConfig {
            max_tiles_per_primitive: Some(32),
            ..RasterConfig::white_background()
        };
        let path = std::env::temp_dir().join(format!("octile-config-{}.json", std::process::id()));
        std::fs::write(&path, config.to_json().unwrap()).unwrap();
        let loaded = RasterConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
