#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::Classifier;
use crate::detect::result::{BoundingBox, RawDetection};
use crate::frame::Frame;

/// Boxes of the same class overlapping more than this are merged by NMS.
const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Candidates below this score never reach NMS unless `with_min_score`
/// lowers it. The object gate applies the configured confidence afterwards.
const DEFAULT_MIN_SCORE: f32 = 0.25;

/// Tract-based YOLOv8 object detector.
///
/// Loads a local ONNX export (`[1, 3, S, S]` input, `[1, 4 + classes, anchors]`
/// output) and a class-names file with one label per line. Frames are resized
/// to the square model input; boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    class_names: Vec<String>,
    min_score: f32,
}

impl TractBackend {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        model_path: P,
        names_path: Q,
        input_size: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let class_names = load_class_names(names_path.as_ref())?;
        log::info!(
            "tract: loaded {} ({} classes, {}x{} input)",
            model_path.display(),
            class_names.len(),
            input_size,
            input_size
        );

        Ok(Self {
            model,
            input_size,
            class_names,
            min_score: DEFAULT_MIN_SCORE,
        })
    }

    /// Lowest class score kept before NMS. Set it to the gate's confidence
    /// threshold so a threshold below the default still sees its candidates.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(
            &image,
            self.input_size,
            self.input_size,
            FilterType::Triangle,
        );

        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;

        if view.shape()[1] <= 4 {
            return Err(anyhow!("model output has no class scores"));
        }

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        let candidates = collect_candidates(view, self.min_score, sx, sy);

        Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD)
            .into_iter()
            .map(|(class_id, score, bbox)| {
                let label = self
                    .class_names
                    .get(class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", class_id));
                RawDetection::new(label, score, bbox)
            })
            .collect())
    }
}

impl Classifier for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = Frame::filled(0, self.input_size, self.input_size, [0, 0, 0])?;
        self.infer(&blank).map(|_| ())
    }
}

/// Best class per anchor, kept when its score reaches `min_score`. Boxes are
/// scaled from model input pixels back to frame pixels.
fn collect_candidates(
    view: tract_ndarray::ArrayView3<f32>,
    min_score: f32,
    sx: f32,
    sy: f32,
) -> Vec<(usize, f32, BoundingBox)> {
    let rows = view.shape()[1];
    let anchors = view.shape()[2];
    let mut candidates = Vec::new();
    for a in 0..anchors {
        let (class_id, score) = (4..rows)
            .map(|r| (r - 4, view[(0, r, a)]))
            .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < min_score {
            continue;
        }
        let (cx, cy, w, h) = (view[(0, 0, a)], view[(0, 1, a)], view[(0, 2, a)], view[(0, 3, a)]);
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * sx) as i32,
            ((cy - h / 2.0) * sy) as i32,
            ((cx + w / 2.0) * sx) as i32,
            ((cy + h / 2.0) * sy) as i32,
        );
        candidates.push((class_id, score, bbox));
    }
    candidates
}

fn load_class_names(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read class names from {}", path.display()))?;
    Ok(raw.lines().map(|line| line.trim().to_string()).collect())
}

/// Greedy per-class NMS, highest score first.
fn non_max_suppression(
    mut candidates: Vec<(usize, f32, BoundingBox)>,
    iou_threshold: f32,
) -> Vec<(usize, f32, BoundingBox)> {
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    let mut kept: Vec<(usize, f32, BoundingBox)> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.0 == cand.0 && k.2.iou(&cand.2) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}
