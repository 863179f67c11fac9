//! Client for a remote identify API that does its own matching and reports
//! cosine similarity for the single best profile.

use recordai_core::{Confidence, EmbeddingSpace, MatchCandidate, MatchOutcome, PersonProfile};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExternalError {
    #[error("identify service unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("identify service rejected image: {0}")]
    Rejected(String),
    #[error("identify service failed ({status}): {detail}")]
    Failed { status: u16, detail: String },
    #[error("malformed identify response: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct IdentifyRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    success: bool,
    #[serde(default, rename = "match")]
    best: Option<RemoteMatch>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteMatch {
    #[serde(default)]
    id: Option<Value>,
    full_name: Option<String>,
    cosine_similarity: f32,
    #[serde(default)]
    linkedin_content: Option<String>,
    #[serde(default)]
    discord_username: Option<String>,
    #[serde(default)]
    photo_path: Option<String>,
    #[serde(default)]
    is_match: Option<bool>,
}

#[derive(Clone)]
pub struct ExternalClient {
    client: reqwest::Client,
    url: String,
}

impl ExternalClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ExternalError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Send one image and convert the remote verdict into a [`MatchOutcome`]
    /// judged against `threshold` in cosine-distance terms.
    pub async fn identify(&self, image: &str, threshold: f32) -> Result<MatchOutcome, ExternalError> {
        let response = self
            .client
            .post(&self.url)
            .json(&IdentifyRequest { image })
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        let parsed = serde_json::from_str::<IdentifyResponse>(&text);

        match (status.as_u16(), parsed) {
            (200..=299, Ok(body)) if body.success => {
                let best = body
                    .best
                    .ok_or_else(|| ExternalError::Malformed("success without match".into()))?;
                Ok(to_outcome(best, threshold))
            }
            // Remote store empty or nothing comparable.
            (404, Ok(body)) | (200..=299, Ok(body)) => Ok(MatchOutcome::not_found(
                threshold,
                body.error.unwrap_or_else(|| "No match returned".to_string()),
            )),
            // Only a complaint about the image itself is the caller's fault.
            (400 | 422, Ok(body)) => Err(ExternalError::Rejected(
                body.error.unwrap_or_else(|| format!("status {status}")),
            )),
            (200..=299, Err(e)) => Err(ExternalError::Malformed(e.to_string())),
            (code, Ok(body)) => Err(ExternalError::Failed {
                status: code,
                detail: body.error.unwrap_or_default(),
            }),
            (code, Err(_)) => Err(ExternalError::Failed {
                status: code,
                detail: text,
            }),
        }
    }
}

fn to_outcome(remote: RemoteMatch, threshold: f32) -> MatchOutcome {
    let space = EmbeddingSpace::External;
    let distance = (1.0 - remote.cosine_similarity).max(0.0);
    let id = match remote.id {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    let full_name = remote.full_name.unwrap_or_else(|| "Unknown".to_string());
    let found = distance < threshold;
    if remote.is_match.is_some_and(|m| m != found) {
        tracing::debug!(
            remote_is_match = remote.is_match,
            found,
            "remote verdict differs from local threshold"
        );
    }

    let candidate = MatchCandidate {
        person: PersonProfile {
            id,
            full_name,
            linkedin_content: remote.linkedin_content,
            discord_username: remote.discord_username,
            photo_path: remote.photo_path,
            label: None,
        },
        distance,
    };
    let confidence: Confidence = space.confidence(distance);
    let message = MatchOutcome::scored_message(&candidate, found);

    MatchOutcome {
        found,
        best: Some(candidate.clone()),
        confidence: Some(confidence),
        runner_ups: vec![candidate],
        threshold,
        skipped: 0,
        message,
    }
}
