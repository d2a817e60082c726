//! Capture-to-encoding pipeline.
//!
//! Decodes captured image bytes, applies the quality gate, detects faces,
//! and extracts an encoding. Enrollment demands exactly one face; probes
//! use the largest detected face.

use crate::detector::{DetectedFace, DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::quality::{self, QualityIssue, MIN_FACE_RATIO};
use crate::types::Encoding;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("could not decode image: {0}")]
    InvalidImage(String),
    #[error(transparent)]
    Quality(#[from] QualityIssue),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{count} faces detected; enrollment images must contain exactly one")]
    MultipleFacesDetected { count: usize },
    #[error("capture failed the liveness heuristic (score {score})")]
    NotLive { score: u32 },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

/// Produces face encodings from captured image bytes.
pub trait FaceEncoder {
    /// Encode the most prominent face of a kiosk capture.
    fn encode_probe(&mut self, image: &[u8]) -> Result<Encoding, EncodeError>;

    /// Encode an enrollment sample. The image must contain exactly one face.
    fn encode_enrollment(&mut self, image: &[u8]) -> Result<Encoding, EncodeError>;
}

/// ONNX-backed encoder: RFB-320 detection plus MobileFaceNet embedding.
pub struct OnnxFaceEncoder {
    detector: FaceDetector,
    embedder: FaceEmbedder,
    /// Apply the screen-replay heuristic to probe captures.
    liveness_enabled: bool,
}

impl OnnxFaceEncoder {
    /// Load both models, failing fast if either file is missing.
    pub fn load(
        detector_path: &str,
        embedder_path: &str,
        liveness_enabled: bool,
    ) -> Result<Self, EncodeError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            embedder: FaceEmbedder::load(embedder_path)?,
            liveness_enabled,
        })
    }

    /// Decode and gate a capture, returning the RGB image for detection.
    fn prepare(&self, image: &[u8]) -> Result<RgbImage, EncodeError> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| EncodeError::InvalidImage(e.to_string()))?;
        let gray = decoded.to_luma8();
        let report = quality::assess(gray.as_raw(), gray.width(), gray.height())?;
        tracing::debug!(
            score = report.score,
            brightness = report.brightness,
            sharpness = report.sharpness,
            "capture passed quality gate"
        );
        Ok(decoded.to_rgb8())
    }

    /// Detect faces and drop boxes below the minimum area share. If every
    /// detection was undersized, surface that rather than "no face".
    fn detect_faces(&mut self, rgb: &RgbImage) -> Result<Vec<DetectedFace>, EncodeError> {
        let faces = self.detector.detect(rgb)?;
        if faces.is_empty() {
            return Ok(faces);
        }

        let (width, height) = (rgb.width(), rgb.height());
        let usable: Vec<DetectedFace> = faces
            .iter()
            .filter(|f| quality::face_area_ratio(f.width(), f.height(), width, height) >= MIN_FACE_RATIO)
            .cloned()
            .collect();

        if usable.is_empty() {
            let largest = faces
                .iter()
                .map(|f| quality::face_area_ratio(f.width(), f.height(), width, height))
                .fold(0.0f32, f32::max);
            return Err(QualityIssue::FaceTooSmall { ratio: largest }.into());
        }
        Ok(usable)
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode_probe(&mut self, image: &[u8]) -> Result<Encoding, EncodeError> {
        let rgb = self.prepare(image)?;

        if self.liveness_enabled {
            let score = quality::liveness(rgb.as_raw(), rgb.width(), rgb.height());
            if !score.is_live {
                tracing::warn!(?score, "probe capture failed liveness heuristic");
                return Err(EncodeError::NotLive { score: score.score });
            }
        }

        let faces = self.detect_faces(&rgb)?;
        let face = faces
            .iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()))
            .ok_or(EncodeError::NoFaceDetected)?;

        Ok(self.embedder.extract(&rgb, face)?)
    }

    fn encode_enrollment(&mut self, image: &[u8]) -> Result<Encoding, EncodeError> {
        let rgb = self.prepare(image)?;
        let faces = self.detect_faces(&rgb)?;
        match faces.as_slice() {
            [] => Err(EncodeError::NoFaceDetected),
            [face] => Ok(self.embedder.extract(&rgb, face)?),
            _ => Err(EncodeError::MultipleFacesDetected { count: faces.len() }),
        }
    }
}
