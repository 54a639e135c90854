//! Pixel-difference motion gate.
//!
//! The gate is a pure function of two consecutive gray frames. The caller owns
//! the "previous" frame and decides what to do with the result; nothing here
//! keeps state between calls.

use anyhow::{anyhow, Result};

use crate::frame::GrayFrame;

/// Number of 3x3 dilation passes applied to the changed-pixel mask.
pub const DILATE_ITERATIONS: usize = 2;

/// Motion thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionThresholds {
    /// A pixel counts as changed when its absolute intensity difference is
    /// strictly greater than this value.
    pub pixel_threshold: u8,
    /// Motion fires when the dilated changed-pixel count is strictly greater
    /// than this value.
    pub area_threshold: usize,
}

impl Default for MotionThresholds {
    fn default() -> Self {
        Self {
            pixel_threshold: 25,
            area_threshold: 5000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotionResult {
    pub is_motion: bool,
    /// Changed pixels after dilation.
    pub changed_pixels: usize,
}

/// Compare two consecutive gray frames.
pub fn evaluate(
    prev: &GrayFrame,
    curr: &GrayFrame,
    thresholds: MotionThresholds,
) -> Result<MotionResult> {
    if prev.width() != curr.width() || prev.height() != curr.height() {
        return Err(anyhow!(
            "motion gate frame size changed from {}x{} to {}x{}",
            prev.width(),
            prev.height(),
            curr.width(),
            curr.height()
        ));
    }

    let mut mask = changed_mask(prev.data(), curr.data(), thresholds.pixel_threshold);
    let width = curr.width() as usize;
    let height = curr.height() as usize;
    for _ in 0..DILATE_ITERATIONS {
        mask = dilate3x3(&mask, width, height);
    }
    let changed_pixels = mask.iter().filter(|&&m| m).count();

    Ok(MotionResult {
        is_motion: changed_pixels > thresholds.area_threshold,
        changed_pixels,
    })
}

fn changed_mask(prev: &[u8], curr: &[u8], pixel_threshold: u8) -> Vec<bool> {
    prev.iter()
        .zip(curr)
        .map(|(&a, &b)| a.abs_diff(b) > pixel_threshold)
        .collect()
}

/// One pass of binary dilation with a 3x3 rectangle. Pixels outside the frame
/// never switch a neighbour on. The rectangle is separable, so the pass runs as
/// a horizontal sweep followed by a vertical one.
fn dilate3x3(mask: &[bool], width: usize, height: usize) -> Vec<bool> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let mut horizontal = vec![false; mask.len()];
    for y in 0..height {
        let row = &mask[y * width..(y + 1) * width];
        let out = &mut horizontal[y * width..(y + 1) * width];
        for x in 0..width {
            let lo = x.saturating_sub(1);
            let hi = (x + 1).min(width - 1);
            out[x] = row[lo..=hi].iter().any(|&m| m);
        }
    }

    let mut dilated = vec![false; mask.len()];
    for y in 0..height {
        let lo = y.saturating_sub(1);
        let hi = (y + 1).min(height - 1);
        for x in 0..width {
            dilated[y * width + x] = (lo..=hi).any(|row| horizontal[row * width + x]);
        }
    }
    dilated
}
