use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face, in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub confidence: f32,
}

impl BoundingBox {
    /// Centre point of the box.
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between the centres of two boxes.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// Face embedding vector (128-dimensional for face-api descriptors,
/// 512-dimensional for Facenet512).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance. `None` when the lengths differ.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f32>()
                .sqrt(),
        )
    }

    /// Cosine similarity in [-1, 1]. `None` when the lengths differ.
    ///
    /// A zero vector has similarity 0 with everything.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        if self.len() != other.len() {
            return None;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        Some(if denom > 0.0 { dot / denom } else { 0.0 })
    }

    /// `1 - cosine_similarity`, in [0, 2]. `None` when the lengths differ.
    pub fn cosine_distance(&self, other: &Embedding) -> Option<f32> {
        // Identical vectors can land a hair above 1.0 in f32.
        self.similarity(other).map(|s| (1.0 - s).max(0.0))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

/// Distance function over embeddings. Smaller is always better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> Option<f32> {
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => a.cosine_distance(b),
        }
    }
}

/// Coarse bucketing of match quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        })
    }
}

/// A comparison space: vectors from different spaces are never compared.
///
/// Each space fixes its dimension, distance function, default threshold and
/// confidence tiers. Tier boundaries are policy constants for that space and
/// do not carry over to another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSpace {
    /// face-api.js descriptors: 128-d, Euclidean.
    FaceApi,
    /// DeepFace Facenet512 embeddings: 512-d, Euclidean.
    DeepFace,
    /// Remote identify API reporting cosine similarity.
    External,
}

impl EmbeddingSpace {
    pub const ALL: [EmbeddingSpace; 3] = [
        EmbeddingSpace::FaceApi,
        EmbeddingSpace::DeepFace,
        EmbeddingSpace::External,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingSpace::FaceApi => "faceapi",
            EmbeddingSpace::DeepFace => "deepface",
            EmbeddingSpace::External => "external",
        }
    }

    /// Expected vector length, if the space stores vectors locally.
    pub fn dimensions(&self) -> Option<usize> {
        match self {
            EmbeddingSpace::FaceApi => Some(128),
            EmbeddingSpace::DeepFace => Some(512),
            EmbeddingSpace::External => None,
        }
    }

    pub fn metric(&self) -> DistanceMetric {
        match self {
            EmbeddingSpace::FaceApi | EmbeddingSpace::DeepFace => DistanceMetric::Euclidean,
            EmbeddingSpace::External => DistanceMetric::Cosine,
        }
    }

    pub fn default_threshold(&self) -> f32 {
        match self {
            EmbeddingSpace::FaceApi => 0.6,
            EmbeddingSpace::DeepFace => 1.0,
            EmbeddingSpace::External => 0.3,
        }
    }

    /// Confidence tier for a distance measured in this space.
    pub fn confidence(&self, distance: f32) -> Confidence {
        match self {
            EmbeddingSpace::FaceApi => {
                let normalized = distance.clamp(0.0, 1.0);
                if normalized < 0.3 {
                    Confidence::High
                } else if normalized < 0.5 {
                    Confidence::Medium
                } else {
                    Confidence::Low
                }
            }
            EmbeddingSpace::DeepFace => {
                if distance < 0.6 {
                    Confidence::High
                } else if distance < 1.0 {
                    Confidence::Medium
                } else {
                    Confidence::Low
                }
            }
            // similarity > 0.8 High, > 0.7 Medium
            EmbeddingSpace::External => {
                if distance < 0.2 {
                    Confidence::High
                } else if distance < 0.3 {
                    Confidence::Medium
                } else {
                    Confidence::Low
                }
            }
        }
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown embedding space: {0}")]
pub struct UnknownSpace(pub String);

impl FromStr for EmbeddingSpace {
    type Err = UnknownSpace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "faceapi" | "faceapi_local" | "face-api" => Ok(EmbeddingSpace::FaceApi),
            "deepface" | "deepface_512" | "facenet512" => Ok(EmbeddingSpace::DeepFace),
            "external" | "external_primary" => Ok(EmbeddingSpace::External),
            other => Err(UnknownSpace(other.to_string())),
        }
    }
}

/// Display metadata of a known person. Never interpreted by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonProfile {
    pub id: String,
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A reference identity with its stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownPerson {
    #[serde(flatten)]
    pub profile: PersonProfile,
    pub embedding: Embedding,
}

/// A known person scored against one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub person: PersonProfile,
    pub distance: f32,
}

/// Result of one match call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub found: bool,
    /// Lowest-distance candidate, present whenever anything was scored.
    pub best: Option<MatchCandidate>,
    /// Tier of `best`, present whenever `best` is.
    pub confidence: Option<Confidence>,
    /// Up to three lowest-distance candidates, ascending.
    pub runner_ups: Vec<MatchCandidate>,
    pub threshold: f32,
    /// Candidates excluded for an embedding length mismatch.
    pub skipped: usize,
    pub message: String,
}

impl MatchOutcome {
    /// A "not found" outcome with nothing scored.
    pub fn not_found(threshold: f32, message: impl Into<String>) -> Self {
        Self {
            found: false,
            best: None,
            confidence: None,
            runner_ups: Vec::new(),
            threshold,
            skipped: 0,
            message: message.into(),
        }
    }

    /// Message for an outcome whose closest candidate is `best`.
    pub fn scored_message(best: &MatchCandidate, found: bool) -> String {
        if found {
            format!("Match found: {}", best.person.full_name)
        } else {
            format!(
                "No confident match. Closest candidate: {} (distance: {:.4})",
                best.person.full_name, best.distance
            )
        }
    }

    /// The identified person, only when the match was accepted.
    pub fn matched(&self) -> Option<&PersonProfile> {
        if self.found {
            self.best.as_ref().map(|c| &c.person)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_euclidean_symmetric_and_zero_on_self() {
        let a = emb(&[0.5, -1.0, 2.0]);
        let b = emb(&[1.5, 0.0, -2.0]);
        assert_eq!(a.euclidean_distance(&b), b.euclidean_distance(&a));
        assert_eq!(a.euclidean_distance(&a), Some(0.0));
    }

    #[test]
    fn test_euclidean_three_four_five() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b).unwrap() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_lengths_are_not_comparable() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[0.0, 0.0, 0.0]);
        assert_eq!(a.euclidean_distance(&b), None);
        assert_eq!(a.cosine_distance(&b), None);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        let a = emb(&[1.0, 0.0]);
        assert!(a.similarity(&emb(&[0.0, 1.0])).unwrap().abs() < 1e-6);
        assert!((a.similarity(&emb(&[-1.0, 0.0])).unwrap() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), Some(1.0));
    }

    #[test]
    fn test_cosine_distance_self_is_zero() {
        let a = emb(&[0.3, 0.4, 0.5]);
        assert!(a.cosine_distance(&a).unwrap() < 1e-6);
    }

    #[test]
    fn test_faceapi_tiers_clamp() {
        let space = EmbeddingSpace::FaceApi;
        assert_eq!(space.confidence(0.1), Confidence::High);
        assert_eq!(space.confidence(0.45), Confidence::Medium);
        assert_eq!(space.confidence(0.55), Confidence::Low);
        assert_eq!(space.confidence(7.0), Confidence::Low);
    }

    #[test]
    fn test_deepface_tiers() {
        let space = EmbeddingSpace::DeepFace;
        assert_eq!(space.confidence(0.59), Confidence::High);
        assert_eq!(space.confidence(0.6), Confidence::Medium);
        assert_eq!(space.confidence(0.99), Confidence::Medium);
        assert_eq!(space.confidence(1.0), Confidence::Low);
    }

    #[test]
    fn test_external_tiers_follow_similarity() {
        let space = EmbeddingSpace::External;
        assert_eq!(space.confidence(1.0 - 0.85), Confidence::High);
        assert_eq!(space.confidence(1.0 - 0.75), Confidence::Medium);
        assert_eq!(space.confidence(1.0 - 0.5), Confidence::Low);
    }

    #[test]
    fn test_space_aliases() {
        assert_eq!("faceapi_local".parse::<EmbeddingSpace>().unwrap(), EmbeddingSpace::FaceApi);
        assert_eq!("DeepFace_512".parse::<EmbeddingSpace>().unwrap(), EmbeddingSpace::DeepFace);
        assert_eq!("external_primary".parse::<EmbeddingSpace>().unwrap(), EmbeddingSpace::External);
        assert!("sift".parse::<EmbeddingSpace>().is_err());
    }

    #[test]
    fn test_embedding_serializes_as_plain_array() {
        let json = serde_json::to_string(&emb(&[1.0, 2.5])).unwrap();
        assert_eq!(json, "[1.0,2.5]");
    }

    #[test]
    fn test_bounding_box_center_distance() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0, confidence: 0.9 };
        let b = BoundingBox { x: 3.0, y: 4.0, width: 10.0, height: 10.0, confidence: 0.9 };
        assert!((a.center_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_scored_message() {
        let bob = MatchCandidate {
            person: PersonProfile {
                id: "b".into(),
                full_name: "Bob".into(),
                ..Default::default()
            },
            distance: 0.71234,
        };
        assert_eq!(MatchOutcome::scored_message(&bob, true), "Match found: Bob");
        assert_eq!(
            MatchOutcome::scored_message(&bob, false),
            "No confident match. Closest candidate: Bob (distance: 0.7123)"
        );
    }
}
