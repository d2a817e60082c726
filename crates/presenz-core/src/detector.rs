//! RFB-320 face detector via ONNX Runtime.
//!
//! Single-shot detector with two output tensors (scores, boxes) over a
//! fixed prior grid. Boxes arrive already decoded to normalized corner
//! coordinates, so post-processing is confidence filtering plus NMS.

use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const RFB_INPUT_WIDTH: usize = 320;
const RFB_INPUT_HEIGHT: usize = 240;
const RFB_MEAN: f32 = 127.0;
const RFB_STD: f32 = 128.0;
const RFB_SCORE_THRESHOLD: f32 = 0.7;
const RFB_NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0} — place the RFB-320 model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// A detected face in original-image pixel coordinates.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
    pub score: f32,
}

impl DetectedFace {
    pub fn width(&self) -> f32 {
        (self.x1 - self.x0).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y1 - self.y0).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// RFB-320 based face detector.
pub struct FaceDetector {
    session: Session,
    /// Output tensor indices (scores, boxes), discovered by name at load
    /// time with a positional fallback.
    score_idx: usize,
    box_idx: usize,
}

impl FaceDetector {
    /// Load the RFB-320 ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "RFB-320 model requires 2 outputs (scores, boxes), got {}",
                output_names.len()
            )));
        }

        let (score_idx, box_idx) = discover_output_indices(&output_names);

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            score_idx,
            box_idx,
            "loaded face detection model"
        );

        Ok(Self {
            session,
            score_idx,
            box_idx,
        })
    }

    /// Detect faces in an RGB image, returning boxes sorted by descending
    /// score after NMS.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let (width, height) = (image.width(), image.height());
        let input = Self::preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[self.score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[self.box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = scores.len() / 2;
        if boxes.len() < candidates * 4 {
            return Err(DetectorError::InferenceFailed(format!(
                "box tensor too short: {} entries for {candidates} candidates",
                boxes.len()
            )));
        }

        let mut detections = Vec::new();
        for i in 0..candidates {
            let score = scores[i * 2 + 1];
            if score < RFB_SCORE_THRESHOLD {
                continue;
            }
            detections.push(DetectedFace {
                x0: (boxes[i * 4] * width as f32).clamp(0.0, width as f32),
                y0: (boxes[i * 4 + 1] * height as f32).clamp(0.0, height as f32),
                x1: (boxes[i * 4 + 2] * width as f32).clamp(0.0, width as f32),
                y1: (boxes[i * 4 + 3] * height as f32).clamp(0.0, height as f32),
                score,
            });
        }

        detections.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(non_max_suppression(detections, RFB_NMS_THRESHOLD))
    }

    /// Stretch-resize to 320×240 (nearest neighbor) and normalize into an
    /// NCHW float tensor.
    fn preprocess(image: &RgbImage) -> Array4<f32> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, RFB_INPUT_HEIGHT, RFB_INPUT_WIDTH));

        for y in 0..RFB_INPUT_HEIGHT {
            for x in 0..RFB_INPUT_WIDTH {
                let src_x = (x * width / RFB_INPUT_WIDTH).min(width - 1) as u32;
                let src_y = (y * height / RFB_INPUT_HEIGHT).min(height - 1) as u32;
                let pixel = image.get_pixel(src_x, src_y);
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (pixel[c] as f32 - RFB_MEAN) / RFB_STD;
                }
            }
        }

        tensor
    }
}

/// Pick (scores, boxes) output indices by name, falling back to positional
/// ordering for models with unhelpful tensor names.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let score = names.iter().position(|n| n.contains("score"));
    let boxes = names.iter().position(|n| n.contains("box"));
    match (score, boxes) {
        (Some(s), Some(b)) if s != b => (s, b),
        _ => (0, 1),
    }
}

fn iou(a: &DetectedFace, b: &DetectedFace) -> f32 {
    let ix = (a.x1.min(b.x1) - a.x0.max(b.x0)).max(0.0);
    let iy = (a.y1.min(b.y1) - a.y0.max(b.y0)).max(0.0);
    let intersection = ix * iy;
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy NMS over detections sorted by descending score.
fn non_max_suppression(detections: Vec<DetectedFace>, threshold: f32) -> Vec<DetectedFace> {
    let mut kept: Vec<DetectedFace> = Vec::new();
    for det in detections {
        if kept.iter().all(|k| iou(k, &det) <= threshold) {
            kept.push(det);
        }
    }
    kept
}
