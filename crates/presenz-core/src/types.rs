use serde::{Deserialize, Serialize};

/// Dimensionality of a face encoding.
pub const ENCODING_DIM: usize = 128;

/// Face encoding vector (128-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoding {
    pub values: Vec<f32>,
    /// Model version that produced this encoding (e.g., "mfn-128").
    pub model_version: Option<String>,
}

impl Encoding {
    /// Compute Euclidean distance to another encoding. Lower = more similar.
    pub fn distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled identity with its stored encoding samples (one to five).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrolledIdentity {
    pub id: String,
    pub employee_code: String,
    pub display_name: String,
    pub org_unit: Option<String>,
    pub encodings: Vec<Encoding>,
}

/// Recognition parameters, passed explicitly on every compare call.
#[derive(Debug, Clone, Copy)]
pub struct RecognitionParams {
    /// Maximum accepted probe-to-sample distance. Lower = stricter.
    pub tolerance: f32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self { tolerance: 0.4 }
    }
}

/// Result of matching a probe encoding against the enrolled gallery.
#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    pub matched: bool,
    /// Smallest probe-to-sample distance seen across the whole gallery.
    pub distance: f32,
    /// Display score in [0, 100] derived from the distance. Not a probability.
    pub confidence: f32,
    /// ID of the matched identity (if any).
    pub identity_id: Option<String>,
    /// Display name of the matched identity (if any).
    pub display_name: Option<String>,
}

/// Display confidence for a match distance: `max(0, (1 - d) * 100)`.
///
/// Strictly decreasing in the distance, clamped at zero. A ranking value
/// for kiosk display, not a calibrated probability.
pub fn confidence_from_distance(distance: f32) -> f32 {
    ((1.0 - distance) * 100.0).max(0.0)
}

/// Strategy for comparing a probe encoding against the enrolled gallery.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Encoding,
        gallery: &[EnrolledIdentity],
        params: RecognitionParams,
    ) -> MatchResult;
}

/// Nearest-neighbor matcher over Euclidean distance.
///
/// Tracks the single smallest distance across every sample of every
/// candidate (a global minimum, not per-identity minima) and accepts only
/// when it falls strictly below the tolerance. Always traverses the full
/// gallery; no early exit.
pub struct NearestMatcher;

impl Matcher for NearestMatcher {
    fn compare(
        &self,
        probe: &Encoding,
        gallery: &[EnrolledIdentity],
        params: RecognitionParams,
    ) -> MatchResult {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, candidate) in gallery.iter().enumerate() {
            for sample in &candidate.encodings {
                let dist = probe.distance(sample);
                if dist < best_dist {
                    best_dist = dist;
                    best_idx = Some(i);
                }
            }
        }

        match best_idx {
            Some(idx) if best_dist < params.tolerance => MatchResult {
                matched: true,
                distance: best_dist,
                confidence: confidence_from_distance(best_dist),
                identity_id: Some(gallery[idx].id.clone()),
                display_name: Some(gallery[idx].display_name.clone()),
            },
            _ => MatchResult {
                matched: false,
                distance: if best_dist.is_finite() { best_dist } else { 0.0 },
                confidence: 0.0,
                identity_id: None,
                display_name: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoding(values: Vec<f32>) -> Encoding {
        Encoding {
            values,
            model_version: None,
        }
    }

    /// An encoding at exactly `dist` from the 128-dim zero vector.
    fn at_distance(dist: f32) -> Encoding {
        let mut values = vec![0.0; ENCODING_DIM];
        values[0] = dist;
        encoding(values)
    }

    fn probe() -> Encoding {
        encoding(vec![0.0; ENCODING_DIM])
    }

    fn identity(id: &str, encodings: Vec<Encoding>) -> EnrolledIdentity {
        EnrolledIdentity {
            id: id.into(),
            employee_code: format!("EMP-{id}"),
            display_name: format!("person {id}"),
            org_unit: None,
            encodings,
        }
    }

    #[test]
    fn test_distance_symmetric() {
        let a = encoding(vec![1.0, 2.0, 3.0]);
        let b = encoding(vec![4.0, 6.0, 3.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
        assert!((b.distance(&a) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_global_minimum_wins_across_identities() {
        // A has samples at 0.5 and 0.38, B at 0.6; tolerance 0.4.
        // 0.38 is the global minimum and below tolerance, so A wins.
        let gallery = vec![
            identity("a", vec![at_distance(0.5), at_distance(0.38)]),
            identity("b", vec![at_distance(0.6)]),
        ];
        let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams::default());
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("a"));
        assert!((result.distance - 0.38).abs() < 1e-6);
        assert!((result.confidence - 62.0).abs() < 1e-4);
    }

    #[test]
    fn test_tolerance_is_strict() {
        let gallery = vec![identity("a", vec![at_distance(0.4)])];
        let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams { tolerance: 0.4 });
        assert!(!result.matched);
        assert!(result.identity_id.is_none());

        // The same distance matches once the tolerance is raised.
        let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams { tolerance: 0.41 });
        assert!(result.matched);
    }

    #[test]
    fn test_acceptance_monotonic_in_tolerance() {
        // Acceptance at a fixed distance flips exactly once as tolerance rises.
        let gallery = vec![identity("a", vec![at_distance(0.35)])];
        for tol in [0.1f32, 0.2, 0.3, 0.36, 0.5, 0.9] {
            let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams { tolerance: tol });
            assert_eq!(result.matched, tol > 0.35, "tolerance {tol}");
        }
    }

    #[test]
    fn test_confidence_decreases_with_distance() {
        let mut previous = f32::INFINITY;
        for dist in [0.05f32, 0.1, 0.2, 0.3, 0.39] {
            let gallery = vec![identity("a", vec![at_distance(dist)])];
            let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams::default());
            assert!(result.matched);
            assert!(result.confidence < previous);
            previous = result.confidence;
        }
    }

    #[test]
    fn test_confidence_clamped_at_zero() {
        assert_eq!(confidence_from_distance(1.5), 0.0);
        assert_eq!(confidence_from_distance(1.0), 0.0);
        assert!(confidence_from_distance(0.99) > 0.0);
    }

    #[test]
    fn test_empty_gallery_is_unmatched() {
        let result = NearestMatcher.compare(&probe(), &[], RecognitionParams::default());
        assert!(!result.matched);
        assert_eq!(result.distance, 0.0);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_probe_near_one_of_several_samples_matches() {
        // Enroll three samples; a probe within tolerance of any one of them
        // resolves to that identity.
        let gallery = vec![
            identity("x", vec![at_distance(0.9), at_distance(0.8), at_distance(0.2)]),
            identity("y", vec![at_distance(0.7)]),
        ];
        let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams::default());
        assert!(result.matched);
        assert_eq!(result.identity_id.as_deref(), Some("x"));
    }

    #[test]
    fn test_match_result_serializes_for_callers() {
        let gallery = vec![identity("a", vec![at_distance(0.38)])];
        let result = NearestMatcher.compare(&probe(), &gallery, RecognitionParams::default());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(json["matched"], true);
        assert_eq!(json["identity_id"], "a");
    }
}
