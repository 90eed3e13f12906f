//! Per-pixel composite output

use crate::types::CompositeResult;
use glam::Vec3;

/// Row-major grid of [`CompositeResult`]s, one per viewport pixel
#[derive(Clone, Debug, PartialEq)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    pixels: Vec<CompositeResult>,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![CompositeResult::CLEAR; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[CompositeResult] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> Option<&CompositeResult> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels.get(y as usize * self.width as usize + x as usize)
    }

    /// Copy a tile's row-major pixels into `(x0, y0, x1, y1)`, upper bound
    /// exclusive
    pub(crate) fn write_tile(&mut self, rect: (u32, u32, u32, u32), tile: &[CompositeResult]) {
        let (x0, y0, x1, y1) = rect;
        let row_len = (x1 - x0) as usize;
        if row_len == 0 {
            return;
        }
        for (row, src) in (y0..y1).zip(tile.chunks_exact(row_len)) {
            let start = row as usize * self.width as usize + x0 as usize;
            self.pixels[start..start + row_len].copy_from_slice(src);
        }
    }

    /// Final colors with the background showing through `transmittance`
    pub fn composite_over(&self, background: Vec3) -> Vec<Vec3> {
        self.pixels
            .iter()
            .map(|p| Vec3::from(p.color) + p.transmittance * background)
            .collect()
    }

    /// Packed RGB8, clamped to `[0, 1]` before quantizing
    pub fn to_rgb8(&self, background: Vec3) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() * 3);
        for color in self.composite_over(background) {
            out.extend(color.to_array().map(quantize));
        }
        out
    }

    /// Accumulated opacity as 8-bit grayscale
    pub fn alpha_image(&self) -> Vec<u8> {
        self.pixels.iter().map(|p| quantize(p.alpha())).collect()
    }

    /// Accumulated depth, normalized by opacity where anything was hit
    pub fn depth_image(&self) -> Vec<f32> {
        self.pixels
            .iter()
            .map(|p| {
                let alpha = p.alpha();
                if alpha > 0.0 {
                    p.depth / alpha
                } else {
                    0.0
                }
            })
            .collect()
    }

    /// Raw pixel structs for upload or dumping
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    /// Mean entries walked per pixel
    pub fn mean_visited(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let total: u64 = self.pixels.iter().map(|p| p.n_visited as u64).sum();
        total as f32 / self.pixels.len() as f32
    }

    /// PSNR in dB against a reference image in `[0, 1]`
    ///
    /// Returns `None` if the reference has the wrong size.
    pub fn psnr(&self, reference: &[Vec3], background: Vec3) -> Option<f32> {
        if reference.len() != self.pixels.len() || reference.is_empty() {
            return None;
        }
        let sum: f32 = self
            .composite_over(background)
            .iter()
            .zip(reference)
            .map(|(a, b)| {
                let d = a.clamp(Vec3::ZERO, Vec3::ONE) - b.clamp(Vec3::ZERO, Vec3::ONE);
                d.length_squared()
            })
            .sum();
        let mse = sum / (reference.len() * 3) as f32;
        if mse < 1e-10 {
            return Some(100.0);
        }
        Some(10.0 * (1.0 / mse).log10())
    }
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}
