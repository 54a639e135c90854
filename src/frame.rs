//! Decoded frames and their grayscale projection.
//!
//! - `Frame`: immutable packed RGB24 image tagged with its position in the stream.
//! - `GrayFrame`: single-channel luma plane derived from a `Frame`, only used for
//!   motion detection.
//!
//! Frame indices are assigned by the source, starting at 0 and increasing by one
//! per decoded frame. Video time is derived from the index and the stream frame
//! rate, never from the wall clock.

use anyhow::{anyhow, Result};

/// Bytes per pixel of the packed RGB24 layout every source produces.
pub const RGB_CHANNELS: usize = 3;

/// Immutable decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    index: u64,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    /// Wrap a packed RGB24 buffer. The buffer length must match the geometry.
    pub fn new(index: u64, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} expected {} RGB bytes for {}x{}, received {}",
                index,
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            pixels,
        })
    }

    /// Solid-colour frame. Mostly useful for synthetic sources and tests.
    pub fn filled(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..len / RGB_CHANNELS {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(index, width, height, pixels)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Packed RGB24 bytes, row-major, no padding.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Seconds of video content elapsed at this frame.
    pub fn video_time(&self, frame_rate: f64) -> f64 {
        self.index as f64 / frame_rate
    }

    /// RGB triple at `(x, y)`. Panics when out of bounds, like slice indexing.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Luma projection for the motion gate.
    pub fn to_gray(&self) -> GrayFrame {
        let data = self
            .pixels
            .chunks_exact(RGB_CHANNELS)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect();
        GrayFrame {
            width: self.width,
            height: self.height,
            data,
        }
    }
}

/// Single-channel intensity plane.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrayFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl GrayFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "gray frame expected {} bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// BT.601 luma in 8-bit fixed point.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}
