//! Capture quality gate and liveness heuristic.
//!
//! The gate operates on 8-bit grayscale pixels: dimension bounds, a
//! Laplacian-variance sharpness check, and brightness bounds. Captures
//! that fail are rejected before any model runs.

use serde::Serialize;
use thiserror::Error;

const MIN_DIMENSION: u32 = 200;
const MAX_DIMENSION: u32 = 2000;
const MIN_SHARPNESS: f64 = 100.0;
const MIN_BRIGHTNESS: f64 = 50.0;
const MAX_BRIGHTNESS: f64 = 200.0;
/// Sharpness at which the quality score saturates at 100.
const SHARPNESS_CEILING: f64 = 500.0;

/// Minimum share of the image area a face box must cover.
pub const MIN_FACE_RATIO: f32 = 0.1;

/// Why a capture was rejected before encoding.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityIssue {
    #[error("image too small ({width}x{height}, minimum 200x200)")]
    TooSmall { width: u32, height: u32 },
    #[error("image too large ({width}x{height}, maximum 2000x2000)")]
    TooLarge { width: u32, height: u32 },
    #[error("image too blurry (sharpness {sharpness:.1})")]
    TooBlurry { sharpness: f64 },
    #[error("image too dark (brightness {brightness:.1})")]
    TooDark { brightness: f64 },
    #[error("image too bright (brightness {brightness:.1})")]
    TooBright { brightness: f64 },
    #[error("face too small in frame (ratio {ratio:.3})")]
    FaceTooSmall { ratio: f32 },
}

/// Metrics for a capture that passed the gate.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// 0–100, derived from sharpness.
    pub score: f64,
    pub brightness: f64,
    pub sharpness: f64,
}

/// Gate a grayscale capture on dimensions, sharpness, and brightness.
pub fn assess(gray: &[u8], width: u32, height: u32) -> Result<QualityReport, QualityIssue> {
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(QualityIssue::TooSmall { width, height });
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(QualityIssue::TooLarge { width, height });
    }

    let sharpness = laplacian_variance(gray, width as usize, height as usize);
    if sharpness < MIN_SHARPNESS {
        return Err(QualityIssue::TooBlurry { sharpness });
    }

    let brightness = mean(gray);
    if brightness < MIN_BRIGHTNESS {
        return Err(QualityIssue::TooDark { brightness });
    }
    if brightness > MAX_BRIGHTNESS {
        return Err(QualityIssue::TooBright { brightness });
    }

    Ok(QualityReport {
        score: (sharpness / SHARPNESS_CEILING * 100.0).min(100.0),
        brightness,
        sharpness,
    })
}

/// Share of the image area covered by a face box of the given size.
pub fn face_area_ratio(face_width: f32, face_height: f32, width: u32, height: u32) -> f32 {
    let image_area = (width as f32) * (height as f32);
    if image_area <= 0.0 {
        return 0.0;
    }
    (face_width * face_height) / image_area
}

fn mean(gray: &[u8]) -> f64 {
    if gray.is_empty() {
        return 0.0;
    }
    gray.iter().map(|&p| p as f64).sum::<f64>() / gray.len() as f64
}

/// Variance of the 4-neighbor Laplacian response over interior pixels.
fn laplacian_variance(gray: &[u8], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 || gray.len() < width * height {
        return 0.0;
    }

    let mut responses = Vec::with_capacity((width - 2) * (height - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = gray[y * width + x] as f64;
            let up = gray[(y - 1) * width + x] as f64;
            let down = gray[(y + 1) * width + x] as f64;
            let left = gray[y * width + x - 1] as f64;
            let right = gray[y * width + x + 1] as f64;
            responses.push(up + down + left + right - 4.0 * center);
        }
    }

    let n = responses.len() as f64;
    let mean = responses.iter().sum::<f64>() / n;
    responses.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
}

// --- Liveness heuristic ---

const TEXTURE_VARIANCE_FLOOR: f64 = 100.0;
const SATURATION_SPREAD_FLOOR: f64 = 20.0;
const EDGE_DENSITY_FLOOR: f64 = 0.1;
const LIVE_SCORE_FLOOR: u32 = 60;
const EDGE_MAGNITUDE_THRESHOLD: f64 = 128.0;

/// Outcome of the screen-replay heuristic.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessScore {
    pub score: u32,
    pub is_live: bool,
    pub texture_variance: f64,
    pub saturation_spread: f64,
    pub edge_density: f64,
}

/// Heuristic screen-replay check over an RGB capture.
///
/// Flat printouts and replayed screens tend to show low texture variance,
/// a narrow saturation spread, and few edges. Weighted per-metric scoring
/// with untuned thresholds — a coarse heuristic, not a security control.
/// Keep it disabled unless the deployment has validated the thresholds.
pub fn liveness(rgb: &[u8], width: u32, height: u32) -> LivenessScore {
    let w = width as usize;
    let h = height as usize;
    let pixels = w * h;

    let mut gray = Vec::with_capacity(pixels);
    let mut saturation = Vec::with_capacity(pixels);
    for chunk in rgb.chunks_exact(3).take(pixels) {
        let (r, g, b) = (chunk[0], chunk[1], chunk[2]);
        // ITU-R BT.601 luma.
        gray.push((0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) as u8);
        let max = r.max(g).max(b) as f64;
        let min = r.min(g).min(b) as f64;
        saturation.push(if max > 0.0 { (max - min) / max * 255.0 } else { 0.0 });
    }

    let texture_variance = laplacian_variance(&gray, w, h);
    let saturation_spread = std_dev(&saturation);
    let edge_density = edge_density(&gray, w, h);

    let mut score = 0;
    if texture_variance > TEXTURE_VARIANCE_FLOOR {
        score += 30;
    }
    if saturation_spread > SATURATION_SPREAD_FLOOR {
        score += 30;
    }
    if edge_density > EDGE_DENSITY_FLOOR {
        score += 40;
    }

    LivenessScore {
        score,
        is_live: score > LIVE_SCORE_FLOOR,
        texture_variance,
        saturation_spread,
        edge_density,
    }
}

fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Fraction of interior pixels whose gradient magnitude crosses the edge
/// threshold (central differences, |gx| + |gy|).
fn edge_density(gray: &[u8], width: usize, height: usize) -> f64 {
    if width < 3 || height < 3 || gray.len() < width * height {
        return 0.0;
    }
    let mut edges = 0usize;
    let mut total = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = gray[y * width + x + 1] as f64 - gray[y * width + x - 1] as f64;
            let gy = gray[(y + 1) * width + x] as f64 - gray[(y - 1) * width + x] as f64;
            if gx.abs() + gy.abs() > EDGE_MAGNITUDE_THRESHOLD {
                edges += 1;
            }
            total += 1;
        }
    }
    edges as f64 / total as f64
}
