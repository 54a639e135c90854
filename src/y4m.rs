//! YUV4MPEG2 stream format.
//!
//! Uncompressed 8-bit planar video with a one-line text header. Used as the
//! dependency-free input and output container; FFmpeg reads and writes it too.

use anyhow::{anyhow, Context, Result};

pub const STREAM_MAGIC: &str = "YUV4MPEG2";
pub const FRAME_MAGIC: &str = "FRAME";

/// Largest width or height accepted from a stream header.
pub const MAX_DIMENSION: u32 = 16384;
/// Largest single frame payload accepted from a stream header.
pub const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;
/// Largest denominator `rate_to_ratio` will search.
const MAX_RATE_DENOMINATOR: u64 = 1_000_000;

/// Chroma layouts this crate can decode. Only 8-bit samples are supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Colorspace {
    C420,
    C422,
    C444,
    Mono,
}

impl Colorspace {
    fn parse(tag: &str) -> Result<Self> {
        match tag {
            "420" | "420jpeg" | "420paldv" | "420mpeg2" => Ok(Self::C420),
            "422" => Ok(Self::C422),
            "444" => Ok(Self::C444),
            "mono" => Ok(Self::Mono),
            other => Err(anyhow!("unsupported y4m colorspace C{}", other)),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::C420 => "420jpeg",
            Self::C422 => "422",
            Self::C444 => "444",
            Self::Mono => "mono",
        }
    }

    /// Width and height of each chroma plane, or `None` for mono.
    pub fn chroma_dims(&self, width: usize, height: usize) -> Option<(usize, usize)> {
        match self {
            Self::C420 => Some((width.div_ceil(2), height.div_ceil(2))),
            Self::C422 => Some((width.div_ceil(2), height)),
            Self::C444 => Some((width, height)),
            Self::Mono => None,
        }
    }

    /// Bytes of one frame payload, or an error when it does not fit in memory.
    pub fn frame_len(&self, width: usize, height: usize) -> Result<usize> {
        let overflow = || anyhow!("y4m frame size {}x{} overflows", width, height);
        let luma = width.checked_mul(height).ok_or_else(overflow)?;
        match self.chroma_dims(width, height) {
            Some((cw, ch)) => cw
                .checked_mul(ch)
                .and_then(|plane| plane.checked_mul(2))
                .and_then(|chroma| chroma.checked_add(luma))
                .ok_or_else(overflow),
            None => Ok(luma),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Y4mHeader {
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub colorspace: Colorspace,
}

impl Y4mHeader {
    /// Parse the stream header line (without the trailing newline).
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_ascii_whitespace();
        if tokens.next() != Some(STREAM_MAGIC) {
            return Err(anyhow!("missing {} signature", STREAM_MAGIC));
        }

        let mut width = None;
        let mut height = None;
        let mut rate = (0u32, 0u32);
        let mut colorspace = Colorspace::C420;
        for token in tokens {
            let mut chars = token.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('W') => width = Some(value.parse::<u32>().context("invalid y4m width")?),
                Some('H') => height = Some(value.parse::<u32>().context("invalid y4m height")?),
                Some('F') => rate = parse_ratio(value)?,
                Some('C') => colorspace = Colorspace::parse(value)?,
                // Interlacing, aspect ratio and extensions do not affect decoding.
                _ => {}
            }
        }

        let width = width.ok_or_else(|| anyhow!("y4m header has no width"))?;
        let height = height.ok_or_else(|| anyhow!("y4m header has no height"))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("y4m frame size {}x{} is empty", width, height));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(anyhow!(
                "y4m frame size {}x{} exceeds {} pixels per side",
                width,
                height,
                MAX_DIMENSION
            ));
        }
        let payload = colorspace.frame_len(width as usize, height as usize)?;
        // Decoded frames are packed RGB24, which is never smaller than the payload.
        let rgb = (width as usize * height as usize).saturating_mul(3);
        if payload.max(rgb) > MAX_FRAME_BYTES {
            return Err(anyhow!(
                "y4m frame size {}x{} needs more than {} bytes per frame",
                width,
                height,
                MAX_FRAME_BYTES
            ));
        }
        Ok(Self {
            width,
            height,
            frame_rate_num: rate.0,
            frame_rate_den: rate.1,
            colorspace,
        })
    }

    /// Frames per second, 0.0 when the header carries no usable rate.
    pub fn frame_rate(&self) -> f64 {
        if self.frame_rate_den == 0 {
            0.0
        } else {
            self.frame_rate_num as f64 / self.frame_rate_den as f64
        }
    }

    /// Bytes of one frame payload. `parse` has already bounded it.
    pub fn frame_len(&self) -> Result<usize> {
        self.colorspace
            .frame_len(self.width as usize, self.height as usize)
    }

    pub fn render(&self) -> String {
        format!(
            "{} W{} H{} F{}:{} Ip A1:1 C{}\n",
            STREAM_MAGIC,
            self.width,
            self.height,
            self.frame_rate_num,
            self.frame_rate_den,
            self.colorspace.tag()
        )
    }
}

fn parse_ratio(value: &str) -> Result<(u32, u32)> {
    let (num, den) = value
        .split_once(':')
        .ok_or_else(|| anyhow!("invalid y4m ratio '{}'", value))?;
    Ok((
        num.parse().context("invalid y4m ratio numerator")?,
        den.parse().context("invalid y4m ratio denominator")?,
    ))
}

/// Express a frame rate as a y4m ratio.
///
/// Walks the continued fraction of `frame_rate` and stops at the first
/// convergent that reproduces it to within float noise, so rates that came
/// from a ratio (`30000:1001`, `25:2`) get that ratio back.
pub fn rate_to_ratio(frame_rate: f64) -> (u32, u32) {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return (0, 1);
    }
    let limit = u32::MAX as u64;
    let (mut p_prev, mut q_prev) = (0u64, 1u64);
    let (mut p, mut q) = (1u64, 0u64);
    let mut x = frame_rate;
    loop {
        let whole = x.floor();
        if whole > limit as f64 {
            break;
        }
        let a = whole as u64;
        let (Some(p_next), Some(q_next)) = (
            a.checked_mul(p).and_then(|v| v.checked_add(p_prev)),
            a.checked_mul(q).and_then(|v| v.checked_add(q_prev)),
        ) else {
            break;
        };
        if p_next > limit || q_next > MAX_RATE_DENOMINATOR {
            break;
        }
        (p_prev, q_prev, p, q) = (p, q, p_next, q_next);

        let frac = x - whole;
        let error = (frame_rate - p as f64 / q as f64).abs();
        if error <= frame_rate * 1e-12 || frac < 1e-12 {
            break;
        }
        x = 1.0 / frac;
    }
    if q == 0 {
        (u32::MAX, 1)
    } else {
        (p as u32, q as u32)
    }
}

/// BT.601 limited-range RGB to YCbCr.
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (clamp(y), clamp(u), clamp(v))
}

/// BT.601 limited-range YCbCr to RGB.
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert one planar frame payload to packed RGB24.
pub fn planes_to_rgb(payload: &[u8], width: usize, height: usize, colorspace: Colorspace) -> Vec<u8> {
    let luma = &payload[..width * height];
    let mut rgb = Vec::with_capacity(width * height * 3);
    match colorspace.chroma_dims(width, height) {
        None => {
            for &y in luma {
                rgb.extend_from_slice(&yuv_to_rgb(y, 128, 128));
            }
        }
        Some((cw, ch)) => {
            let (u_plane, v_plane) = payload[width * height..].split_at(cw * ch);
            let x_shift = usize::from(cw < width);
            let y_shift = usize::from(ch < height);
            for row in 0..height {
                for col in 0..width {
                    let ci = (row >> y_shift) * cw + (col >> x_shift);
                    rgb.extend_from_slice(&yuv_to_rgb(
                        luma[row * width + col],
                        u_plane[ci],
                        v_plane[ci],
                    ));
                }
            }
        }
    }
    rgb
}

/// Convert packed RGB24 to a 4:4:4 planar payload.
pub fn rgb_to_planes_444(rgb: &[u8]) -> Vec<u8> {
    let pixels = rgb.len() / 3;
    let mut out = vec![0u8; pixels * 3];
    let (y_plane, rest) = out.split_at_mut(pixels);
    let (u_plane, v_plane) = rest.split_at_mut(pixels);
    for (i, px) in rgb.chunks_exact(3).enumerate() {
        let (y, u, v) = rgb_to_yuv(px[0], px[1], px[2]);
        y_plane[i] = y;
        u_plane[i] = u;
        v_plane[i] = v;
    }
    out
}
