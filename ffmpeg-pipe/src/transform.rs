//! Per-frame picture transforms applied between video decode and encode.

use crate::error::Result;
use crate::frame::{Raster, RasterFrame};

/// A pure per-frame transform: same dimensions and pixel layout out as in,
/// no dependency on neighbouring frames.
pub trait FrameTransform<F>: Send {
    fn transform(&self, frame: F) -> Result<F>;
}

// Luma weights in units of 1/10000. They sum to exactly 1 so a pixel that is
// already gray maps to itself. Blue is 0.1141 rather than 0.114, so about
// 1.3% of colours land one level above truncated 0.2989R + 0.587G + 0.114B,
// e.g. (0, 0, 114) gives 13 instead of 12.
const WEIGHT_R: u32 = 2989;
const WEIGHT_G: u32 = 5870;
const WEIGHT_B: u32 = 1141;
const WEIGHT_SCALE: u32 = 10_000;

/// Luminance of one RGB pixel, truncated to 8 bits.
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    ((WEIGHT_R * r as u32 + WEIGHT_G * g as u32 + WEIGHT_B * b as u32) / WEIGHT_SCALE) as u8
}

/// Replace every pixel with its luminance on all three channels.
pub fn grayscale(raster: &Raster) -> Raster {
    let mut out = raster.clone();
    for px in out.data_mut().chunks_exact_mut(Raster::CHANNELS) {
        let y = luminance(px[0], px[1], px[2]);
        px.fill(y);
    }
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl<F: RasterFrame> FrameTransform<F> for Grayscale {
    fn transform(&self, mut frame: F) -> Result<F> {
        let gray = grayscale(&frame.raster()?);
        frame.set_raster(&gray)?;
        Ok(frame)
    }
}
