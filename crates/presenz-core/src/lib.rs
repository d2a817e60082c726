//! presenz-core — face matching and attendance decision engine.
//!
//! Face detection (RFB-320) and embedding (MobileFaceNet) run via ONNX
//! Runtime; identity matching and check-in/check-out resolution are pure
//! functions over the resulting encodings.

pub mod detector;
pub mod embedder;
pub mod encoder;
pub mod quality;
pub mod resolver;
pub mod types;

pub use encoder::{EncodeError, FaceEncoder, OnnxFaceEncoder};
pub use types::{Encoding, EnrolledIdentity, MatchResult, Matcher, NearestMatcher, RecognitionParams};

use std::path::PathBuf;

/// Default directory for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/local/share/presenz/models")
}
