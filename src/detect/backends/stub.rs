use anyhow::Result;

use crate::detect::backend::Classifier;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::{luma, Frame};

/// Stub classifier for testing and demos. Reports every sufficiently large
/// bright region as a single object.
///
/// Pairs with the synthetic `stub://` source, which draws its "subjects" as
/// white blocks on a dark background.
pub struct StubBackend {
    label: String,
    confidence: f32,
    luma_threshold: u8,
    min_pixels: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            label: "person".to_string(),
            confidence: 0.9,
            luma_threshold: 200,
            min_pixels: 64,
        }
    }

    /// Label reported for bright regions.
    pub fn with_label(mut self, label: impl Into<String>, confidence: f32) -> Self {
        self.label = label.into();
        self.confidence = confidence;
        self
    }

    /// Minimum number of bright pixels before anything is reported.
    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels;
        self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let width = frame.width() as usize;
        let mut count = 0usize;
        let mut bbox: Option<BoundingBox> = None;

        for (i, px) in frame.pixels().chunks_exact(3).enumerate() {
            if luma(px[0], px[1], px[2]) <= self.luma_threshold {
                continue;
            }
            count += 1;
            let x = (i % width) as i32;
            let y = (i / width) as i32;
            bbox = Some(match bbox {
                None => BoundingBox::new(x, y, x + 1, y + 1),
                Some(b) => BoundingBox::new(b.x1.min(x), b.y1.min(y), b.x2.max(x + 1), b.y2.max(y + 1)),
            });
        }

        match bbox {
            Some(bbox) if count >= self.min_pixels => Ok(vec![RawDetection::new(
                self.label.clone(),
                self.confidence,
                bbox,
            )]),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_block(x0: u32, y0: u32, size: u32) -> Frame {
        let (w, h) = (64u32, 48u32);
        let mut pixels = vec![10u8; (w * h * 3) as usize];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let idx = ((y * w + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::new(0, w, h, pixels).unwrap()
    }

    #[test]
    fn reports_bright_block_with_its_box() {
        let mut backend = StubBackend::new();
        let detections = backend.infer(&frame_with_block(8, 4, 10)).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].bbox, BoundingBox::new(8, 4, 18, 14));
    }

    #[test]
    fn ignores_small_or_missing_blocks() {
        let mut backend = StubBackend::new();
        assert!(backend.infer(&frame_with_block(0, 0, 4)).unwrap().is_empty());
        let dark = Frame::filled(0, 16, 16, [0, 0, 0]).unwrap();
        assert!(backend.infer(&dark).unwrap().is_empty());
    }

    #[test]
    fn label_is_configurable() {
        let mut backend = StubBackend::new().with_label("dog", 0.7).with_min_pixels(1);
        let detections = backend.infer(&frame_with_block(0, 0, 2)).unwrap();
        assert_eq!(detections[0].label, "dog");
        assert_eq!(detections[0].confidence, 0.7);
    }
}
