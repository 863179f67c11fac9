//! Request and response bodies for the HTTP API.

use crate::backend::IdentifyInput;
use recordai_core::{Confidence, MatchCandidate, MatchOutcome};
use serde::{Deserialize, Serialize};

/// Request body for `POST /api/match`.
///
/// Any mix of the singular and plural fields is accepted; singular values
/// come first in capture order.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub face_descriptor: Option<Vec<f32>>,
    #[serde(default)]
    pub face_descriptors: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    pub threshold: Option<f32>,
    #[serde(default)]
    pub method: Option<String>,
}

impl MatchRequest {
    pub fn into_input(self) -> (Option<String>, IdentifyInput) {
        let mut images: Vec<String> = self.image.into_iter().collect();
        images.extend(self.images.unwrap_or_default());
        let mut descriptors: Vec<Vec<f32>> = self.face_descriptor.into_iter().collect();
        descriptors.extend(self.face_descriptors.unwrap_or_default());
        (
            self.method,
            IdentifyInput {
                images,
                descriptors,
                threshold: self.threshold,
            },
        )
    }
}

/// One ranked candidate in a match response, shown as a "possible match"
/// even when nothing cleared the threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateResponse {
    pub id: String,
    pub person_name: String,
    pub distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discord_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linkedin_content: Option<String>,
}

impl From<&MatchCandidate> for CandidateResponse {
    fn from(c: &MatchCandidate) -> Self {
        Self {
            id: c.person.id.clone(),
            person_name: c.person.full_name.clone(),
            distance: c.distance,
            discord_username: c.person.discord_username.clone(),
            photo_path: c.person.photo_path.clone(),
            linkedin_content: c.person.linkedin_content.clone(),
        }
    }
}

/// Response body for `POST /api/match`, also used for error bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub match_found: bool,
    pub person_name: Option<String>,
    pub distance: Option<f32>,
    pub confidence: Option<Confidence>,
    pub threshold: f32,
    pub linkedin_content: Option<String>,
    pub discord_username: Option<String>,
    pub photo_path: Option<String>,
    pub candidates: Vec<CandidateResponse>,
    pub message: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MatchResponse {
    /// Build a response from an outcome. Profile fields are filled only
    /// when the match was accepted.
    pub fn from_outcome(outcome: MatchOutcome, method: &str) -> Self {
        let candidates = outcome.runner_ups.iter().map(CandidateResponse::from).collect();
        let distance = outcome.best.as_ref().map(|b| b.distance);
        let matched = if outcome.found {
            outcome.best.map(|b| b.person)
        } else {
            None
        };
        Self {
            match_found: outcome.found,
            person_name: matched.as_ref().map(|p| p.full_name.clone()),
            distance,
            confidence: outcome.confidence,
            threshold: outcome.threshold,
            linkedin_content: matched.as_ref().and_then(|p| p.linkedin_content.clone()),
            discord_username: matched.as_ref().and_then(|p| p.discord_username.clone()),
            photo_path: matched.and_then(|p| p.photo_path),
            candidates,
            message: outcome.message,
            method: method.to_string(),
            error: None,
        }
    }

    /// Body returned with a 4xx/5xx status.
    pub fn failure(method: &str, threshold: f32, error: &str, message: String) -> Self {
        Self {
            match_found: false,
            person_name: None,
            distance: None,
            confidence: None,
            threshold,
            linkedin_content: None,
            discord_username: None,
            photo_path: None,
            candidates: Vec::new(),
            message,
            method: method.to_string(),
            error: Some(error.to_string()),
        }
    }
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: String,
    pub store_connected: bool,
    pub database_records: Option<usize>,
    pub methods: Vec<String>,
    pub default_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body for `GET /`.
#[derive(Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub service: String,
    pub version: String,
    pub endpoints: Vec<String>,
    pub methods: Vec<String>,
    pub default_method: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use recordai_core::PersonProfile;

    fn candidate(name: &str, distance: f32) -> MatchCandidate {
        MatchCandidate {
            person: PersonProfile {
                id: name.to_lowercase(),
                full_name: name.into(),
                photo_path: Some(format!("{}.jpg", name.to_lowercase())),
                ..Default::default()
            },
            distance,
        }
    }

    #[test]
    fn test_into_input_orders_singular_first() {
        let req = MatchRequest {
            image: Some("a".into()),
            images: Some(vec!["b".into(), "c".into()]),
            face_descriptor: Some(vec![1.0]),
            face_descriptors: Some(vec![vec![2.0]]),
            threshold: Some(0.5),
            method: Some("deepface".into()),
        };
        let (method, input) = req.into_input();
        assert_eq!(method.as_deref(), Some("deepface"));
        assert_eq!(input.images, vec!["a", "b", "c"]);
        assert_eq!(input.descriptors, vec![vec![1.0], vec![2.0]]);
        assert_eq!(input.threshold, Some(0.5));
    }

    #[test]
    fn test_miss_hides_profile_but_keeps_distance() {
        let best = candidate("Bob", 0.9);
        let outcome = MatchOutcome {
            found: false,
            best: Some(best.clone()),
            confidence: Some(Confidence::Low),
            runner_ups: vec![best],
            threshold: 0.6,
            skipped: 0,
            message: "No confident match".into(),
        };
        let resp = MatchResponse::from_outcome(outcome, "faceapi");
        assert!(!resp.match_found);
        assert!(resp.person_name.is_none());
        assert!(resp.photo_path.is_none());
        assert_eq!(resp.distance, Some(0.9));
        assert_eq!(resp.candidates.len(), 1);
        assert_eq!(resp.candidates[0].person_name, "Bob");
        assert_eq!(resp.candidates[0].photo_path.as_deref(), Some("bob.jpg"));
    }

    #[test]
    fn test_hit_carries_profile() {
        let best = candidate("Alice", 0.1);
        let outcome = MatchOutcome {
            found: true,
            best: Some(best.clone()),
            confidence: Some(Confidence::High),
            runner_ups: vec![best],
            threshold: 0.6,
            skipped: 0,
            message: "Match found: Alice".into(),
        };
        let json = serde_json::to_value(MatchResponse::from_outcome(outcome, "faceapi")).unwrap();
        assert_eq!(json["person_name"], "Alice");
        assert_eq!(json["photo_path"], "alice.jpg");
        assert_eq!(json["confidence"], "High");
        assert!(json["linkedin_content"].is_null());
        assert!(json.get("error").is_none());
    }
}
