use serde::{Deserialize, Serialize};

/// Face embedding vector (typically 512-dimensional for ArcFace-family models).
///
/// The checkpoint core treats embeddings as opaque fixed-length vectors; the
/// only semantic fact it relies on is the cosine-distance-to-threshold
/// comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Cosine similarity between two embeddings, in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance (1 − cosine similarity), in [0, 2]. Smaller = more similar.
    ///
    /// This is the metric the gallery ranks by, matching the pgvector `<=>`
    /// operator semantics of the original store.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// The closest gallery entry to a probe vector.
#[derive(Debug, Clone)]
pub struct NearestMatch {
    /// Gallery row id of the winning entry (deterministic tie-break: lowest wins).
    pub entry_id: i64,
    pub identity_id: i64,
    pub name: String,
    pub affiliation: Option<String>,
    /// Cosine distance between probe and entry.
    pub distance: f32,
}

/// Terminal state of one recognition event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    /// Within threshold, first event of the day: attendance recorded.
    Success,
    /// Within threshold but already recorded today; not double-counted.
    Duplicate,
    /// Nearest neighbor is farther than the acceptance threshold.
    Unrecognized,
    /// No usable face vector could be derived from the capture.
    FaceNotDetected,
    /// The gallery holds no entries at all; the system is not provisioned.
    GalleryEmpty,
}

/// Structured outcome of one recognition event, returned to presentation
/// layers once the ledger decision is final. Audio ensuring runs in the
/// background; `artifact_key` names the artifact a client may fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionOutcome {
    pub status: RecognitionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    pub artifact_key: String,
    /// Path of the persisted capture image; set only on `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_image: Option<String>,
    /// Ledger id of the recorded event; set only on `Success`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
}

impl RecognitionOutcome {
    pub fn face_not_detected(artifact_key: String) -> Self {
        Self {
            status: RecognitionStatus::FaceNotDetected,
            name: None,
            affiliation: None,
            distance: None,
            artifact_key,
            captured_image: None,
            log_id: None,
        }
    }

    pub fn gallery_empty(artifact_key: String) -> Self {
        Self {
            status: RecognitionStatus::GalleryEmpty,
            name: None,
            affiliation: None,
            distance: None,
            artifact_key,
            captured_image: None,
            log_id: None,
        }
    }

    pub fn unrecognized(distance: f32, artifact_key: String) -> Self {
        Self {
            status: RecognitionStatus::Unrecognized,
            name: None,
            affiliation: None,
            distance: Some(distance),
            artifact_key,
            captured_image: None,
            log_id: None,
        }
    }

    pub fn duplicate(nearest: &NearestMatch, artifact_key: String) -> Self {
        Self {
            status: RecognitionStatus::Duplicate,
            name: Some(nearest.name.clone()),
            affiliation: nearest.affiliation.clone(),
            distance: Some(nearest.distance),
            artifact_key,
            captured_image: None,
            log_id: None,
        }
    }

    pub fn success(
        nearest: &NearestMatch,
        artifact_key: String,
        captured_image: String,
        log_id: i64,
    ) -> Self {
        Self {
            status: RecognitionStatus::Success,
            name: Some(nearest.name.clone()),
            affiliation: nearest.affiliation.clone(),
            distance: Some(nearest.distance),
            artifact_key,
            captured_image: Some(captured_image),
            log_id: Some(log_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_outcome_serializes_snake_case_status() {
        let out = RecognitionOutcome::face_not_detected("face_not_detected".into());
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "face_not_detected");
        assert_eq!(json["artifact_key"], "face_not_detected");
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_success_outcome_carries_capture_and_log_id() {
        let nearest = NearestMatch {
            entry_id: 1,
            identity_id: 7,
            name: "Alice".into(),
            affiliation: Some("Engineering".into()),
            distance: 0.05,
        };
        let out =
            RecognitionOutcome::success(&nearest, "welcome_alice".into(), "/tmp/x.jpg".into(), 42);
        assert_eq!(out.status, RecognitionStatus::Success);
        assert_eq!(out.log_id, Some(42));
        assert_eq!(out.captured_image.as_deref(), Some("/tmp/x.jpg"));
    }
}
