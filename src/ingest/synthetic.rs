//! Synthetic scene source (`stub://`).
//!
//! Renders a static textured background and, during configured "visits", a
//! bright square subject sliding across the frame. The output is fully
//! deterministic, which makes it useful for demos and end-to-end tests without
//! a real video file. The subject is what `StubBackend` reports as a person.

use anyhow::{anyhow, Context, Result};

use super::FrameSource;
use crate::frame::Frame;

const BACKGROUND_BASE: u8 = 16;
const SUBJECT_RGB: [u8; 3] = [250, 250, 250];

/// Scene parameters. All visit ranges are half-open frame index ranges.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneConfig {
    pub frames: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub subject_size: u32,
    /// Horizontal pixels the subject moves per frame.
    pub step: u32,
    pub visits: Vec<(u64, u64)>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            frames: 250,
            fps: 25.0,
            width: 640,
            height: 480,
            subject_size: 96,
            step: 24,
            visits: vec![(25, 75), (150, 175)],
        }
    }
}

impl SceneConfig {
    /// Parse `stub://<name>?frames=N&fps=F&size=WxH&subject=S&step=P&visits=A-B,C-D`.
    /// Missing parameters keep their defaults.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source url must start with stub://"))?;
        let mut cfg = Self::default();
        let Some((_, query)) = rest.split_once('?') else {
            return Ok(cfg);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed scene parameter '{}'", pair))?;
            match key {
                "frames" => cfg.frames = value.parse().context("invalid frames")?,
                "fps" => cfg.fps = value.parse().context("invalid fps")?,
                "size" => {
                    let (w, h) = value
                        .split_once('x')
                        .ok_or_else(|| anyhow!("size must look like 640x480"))?;
                    cfg.width = w.parse().context("invalid width")?;
                    cfg.height = h.parse().context("invalid height")?;
                }
                "subject" => cfg.subject_size = value.parse().context("invalid subject size")?,
                "step" => cfg.step = value.parse().context("invalid step")?,
                "visits" => cfg.visits = parse_visits(value)?,
                other => return Err(anyhow!("unknown scene parameter '{}'", other)),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("scene size must be non-zero"));
        }
        if self.subject_size == 0 || self.subject_size > self.width || self.subject_size > self.height {
            return Err(anyhow!(
                "subject size {} does not fit a {}x{} scene",
                self.subject_size,
                self.width,
                self.height
            ));
        }
        Ok(())
    }

    fn subject_origin(&self, index: u64) -> Option<(u32, u32)> {
        let (start, _) = self
            .visits
            .iter()
            .find(|(start, end)| (*start..*end).contains(&index))?;
        let travel = (self.width - self.subject_size).max(1) as u64;
        let x = ((index - start) * self.step as u64 % travel) as u32;
        let y = (self.height - self.subject_size) / 2;
        Some((x, y))
    }
}

fn parse_visits(value: &str) -> Result<Vec<(u64, u64)>> {
    value
        .split(',')
        .filter(|v| !v.is_empty())
        .map(|range| {
            let (start, end) = range
                .split_once('-')
                .ok_or_else(|| anyhow!("visit '{}' must look like START-END", range))?;
            let start: u64 = start.parse().context("invalid visit start")?;
            let end: u64 = end.parse().context("invalid visit end")?;
            if end < start {
                return Err(anyhow!("visit '{}' ends before it starts", range));
            }
            Ok((start, end))
        })
        .collect()
}

pub struct SyntheticSource {
    config: SceneConfig,
    frame_count: u64,
    background: Vec<u8>,
}

impl SyntheticSource {
    pub fn new(config: SceneConfig) -> Result<Self> {
        config.validate()?;
        let background = render_background(config.width, config.height);
        log::info!(
            "SyntheticSource: {} frames at {} fps, {}x{}, {} visits",
            config.frames,
            config.fps,
            config.width,
            config.height,
            config.visits.len()
        );
        Ok(Self {
            config,
            frame_count: 0,
            background,
        })
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Self::new(SceneConfig::from_url(url)?)
    }

    fn render(&self, index: u64) -> Result<Frame> {
        let mut pixels = self.background.clone();
        if let Some((x0, y0)) = self.config.subject_origin(index) {
            let width = self.config.width as usize;
            let size = self.config.subject_size as usize;
            for y in y0 as usize..y0 as usize + size {
                for x in x0 as usize..x0 as usize + size {
                    let idx = (y * width + x) * 3;
                    pixels[idx..idx + 3].copy_from_slice(&SUBJECT_RGB);
                }
            }
        }
        Frame::new(index, self.config.width, self.config.height, pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn frame_rate(&self) -> f64 {
        self.config.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.config.frames {
            return Ok(None);
        }
        let frame = self.render(self.frame_count)?;
        self.frame_count += 1;
        Ok(Some(frame))
    }
}

fn render_background(width: u32, height: u32) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let v = BACKGROUND_BASE + ((x / 8 + y / 8) % 4) as u8 * 4;
            pixels.extend_from_slice(&[v, v, v]);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scene_url() {
        let cfg = SceneConfig::from_url("stub://yard?frames=40&fps=10&size=64x48&subject=16&step=4&visits=5-10,20-30").unwrap();
        assert_eq!(cfg.frames, 40);
        assert_eq!(cfg.fps, 10.0);
        assert_eq!((cfg.width, cfg.height), (64, 48));
        assert_eq!(cfg.subject_size, 16);
        assert_eq!(cfg.visits, vec![(5, 10), (20, 30)]);
    }

    #[test]
    fn plain_url_uses_defaults() {
        assert_eq!(SceneConfig::from_url("stub://front").unwrap(), SceneConfig::default());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert!(SceneConfig::from_url("stub://x?frames=abc").is_err());
        assert!(SceneConfig::from_url("stub://x?colour=red").is_err());
        assert!(SceneConfig::from_url("stub://x?visits=9-3").is_err());
        assert!(SceneConfig::from_url("stub://x?size=8x8&subject=16").is_err());
        assert!(SceneConfig::from_url("file:///tmp/x").is_err());
    }

    #[test]
    fn yields_exactly_the_configured_frames() {
        let mut source = SyntheticSource::from_url("stub://x?frames=3&size=32x32&subject=8").unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            indices.push(frame.index());
        }
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn subject_only_appears_during_visits() {
        let mut source =
            SyntheticSource::from_url("stub://x?frames=4&size=32x32&subject=8&visits=2-3").unwrap();
        let frames: Vec<Frame> = std::iter::from_fn(|| source.next_frame().unwrap()).collect();
        let has_subject = |f: &Frame| f.pixels().chunks_exact(3).any(|px| px[0] == SUBJECT_RGB[0]);
        assert_eq!(
            frames.iter().map(has_subject).collect::<Vec<_>>(),
            vec![false, false, true, false]
        );
    }
}
