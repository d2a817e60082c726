//! MobileFaceNet embedder via ONNX Runtime.
//!
//! Produces L2-normalized 128-dimensional encodings from face crops
//! resized to 112×112.

use crate::detector::DetectedFace;
use crate::types::{Encoding, ENCODING_DIM};
use image::{imageops, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const MFN_INPUT_SIZE: u32 = 112;
const MFN_MEAN: f32 = 127.5;
const MFN_STD: f32 = 127.5;
const MFN_MODEL_VERSION: &str = "mfn-128";
/// Margin added around the detector box before cropping, as a fraction of
/// the box size on each side.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model file not found: {0} — place the MobileFaceNet model in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// MobileFaceNet-based encoding extractor.
pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the MobileFaceNet ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, EmbedderError> {
        if !Path::new(model_path).exists() {
            return Err(EmbedderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded face embedding model");

        Ok(Self { session })
    }

    /// Extract an encoding for one detected face.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &DetectedFace,
    ) -> Result<Encoding, EmbedderError> {
        let crop = crop_face(image, face);
        let input = Self::preprocess(&crop);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::InferenceFailed(format!("encoding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ENCODING_DIM {
            return Err(EmbedderError::InferenceFailed(format!(
                "expected {ENCODING_DIM}-dim encoding, got {}",
                raw.len()
            )));
        }

        // L2-normalize so Euclidean distances are comparable across captures.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            raw.iter().map(|x| x / norm).collect()
        } else {
            raw
        };

        Ok(Encoding {
            values,
            model_version: Some(MFN_MODEL_VERSION.to_string()),
        })
    }

    /// Preprocess a 112×112 RGB crop into an NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = MFN_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                let pixel = crop.get_pixel(x as u32, y as u32);
                for c in 0..3 {
                    tensor[[0, c, y, x]] = (pixel[c] as f32 - MFN_MEAN) / MFN_STD;
                }
            }
        }

        tensor
    }
}

/// Crop the face box with margin, clamped to the image bounds, and resize
/// to the model input size.
fn crop_face(image: &RgbImage, face: &DetectedFace) -> RgbImage {
    let margin_x = face.width() * CROP_MARGIN;
    let margin_y = face.height() * CROP_MARGIN;

    let x0 = ((face.x0 - margin_x).max(0.0) as u32).min(image.width() - 1);
    let y0 = ((face.y0 - margin_y).max(0.0) as u32).min(image.height() - 1);
    let x1 = ((face.x1 + margin_x).min(image.width() as f32) as u32).max(x0 + 1);
    let y1 = ((face.y1 + margin_y).min(image.height() as f32) as u32).max(y0 + 1);

    let view = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    imageops::resize(&view, MFN_INPUT_SIZE, MFN_INPUT_SIZE, imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let crop = RgbImage::from_pixel(MFN_INPUT_SIZE, MFN_INPUT_SIZE, image::Rgb([128, 128, 128]));
        let tensor = FaceEmbedder::preprocess(&crop);
        assert_eq!(tensor.shape(), &[1, 3, MFN_INPUT_SIZE as usize, MFN_INPUT_SIZE as usize]);
    }

    #[test]
    fn test_preprocess_normalization() {
        // Pixel value 128 maps to (128 - 127.5) / 127.5.
        let crop = RgbImage::from_pixel(MFN_INPUT_SIZE, MFN_INPUT_SIZE, image::Rgb([128, 128, 128]));
        let tensor = FaceEmbedder::preprocess(&crop);
        let expected = (128.0 - MFN_MEAN) / MFN_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_crop_face_output_size() {
        let image = RgbImage::from_pixel(640, 480, image::Rgb([10, 20, 30]));
        let face = DetectedFace { x0: 100.0, y0: 100.0, x1: 300.0, y1: 340.0, score: 0.9 };
        let crop = crop_face(&image, &face);
        assert_eq!(crop.width(), MFN_INPUT_SIZE);
        assert_eq!(crop.height(), MFN_INPUT_SIZE);
    }

    #[test]
    fn test_crop_face_clamps_to_image_bounds() {
        // Box hanging off the top-left corner still yields a valid crop.
        let image = RgbImage::from_pixel(320, 240, image::Rgb([10, 20, 30]));
        let face = DetectedFace { x0: -20.0, y0: -20.0, x1: 50.0, y1: 50.0, score: 0.9 };
        let crop = crop_face(&image, &face);
        assert_eq!(crop.width(), MFN_INPUT_SIZE);
        assert_eq!(crop.height(), MFN_INPUT_SIZE);
    }
}
