//! HTTP client for a running `recordaid`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use recordai_core::session::IdentityClient;
use recordai_core::{Embedding, MatchCandidate, MatchOutcome, PersonProfile};
use recordaid::api::models::{HealthResponse, MatchRequest, MatchResponse};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request to recordaid failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("recordaid returned {status}: {message}")]
    Server { status: u16, message: String },
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct ServerClient {
    client: reqwest::Client,
    base_url: String,
    method: Option<String>,
    threshold: Option<f32>,
}

impl ServerClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        method: Option<String>,
        threshold: Option<f32>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            method,
            threshold,
        })
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.error_for_status()?.json().await?)
    }

    /// Identify from image files, read and base64-encoded in order.
    pub async fn identify_images(&self, paths: &[impl AsRef<Path>]) -> Result<MatchResponse, ClientError> {
        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let bytes = tokio::fs::read(path).await.map_err(|source| ClientError::Read {
                path: path.display().to_string(),
                source,
            })?;
            images.push(STANDARD.encode(bytes));
        }
        self.send(MatchRequest {
            images: Some(images),
            ..self.request()
        })
        .await
    }

    pub async fn identify_descriptors(
        &self,
        descriptors: Vec<Vec<f32>>,
    ) -> Result<MatchResponse, ClientError> {
        self.send(MatchRequest {
            face_descriptors: Some(descriptors),
            ..self.request()
        })
        .await
    }

    fn request(&self) -> MatchRequest {
        MatchRequest {
            threshold: self.threshold,
            method: self.method.clone(),
            ..MatchRequest::default()
        }
    }

    async fn send(&self, request: MatchRequest) -> Result<MatchResponse, ClientError> {
        let resp = self
            .client
            .post(format!("{}/api/match", self.base_url))
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let message = match resp.json::<MatchResponse>().await {
            Ok(body) => body.message,
            Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
        };
        Err(ClientError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

impl IdentityClient for ServerClient {
    type Error = ClientError;

    async fn identify(&self, query: Embedding) -> Result<MatchOutcome, ClientError> {
        let response = self.identify_descriptors(vec![query.values]).await?;
        Ok(outcome_from_response(response))
    }
}

/// Rebuild a [`MatchOutcome`] from the wire response.
pub fn outcome_from_response(resp: MatchResponse) -> MatchOutcome {
    let runner_ups: Vec<MatchCandidate> = resp
        .candidates
        .iter()
        .map(|c| MatchCandidate {
            person: PersonProfile {
                id: c.id.clone(),
                full_name: c.person_name.clone(),
                linkedin_content: c.linkedin_content.clone(),
                discord_username: c.discord_username.clone(),
                photo_path: c.photo_path.clone(),
                label: None,
            },
            distance: c.distance,
        })
        .collect();

    let best = match (&resp.person_name, resp.distance) {
        (Some(name), Some(distance)) if resp.match_found => Some(MatchCandidate {
            person: PersonProfile {
                id: runner_ups
                    .first()
                    .filter(|c| &c.person.full_name == name)
                    .map(|c| c.person.id.clone())
                    .unwrap_or_default(),
                full_name: name.clone(),
                linkedin_content: resp.linkedin_content.clone(),
                discord_username: resp.discord_username.clone(),
                photo_path: resp.photo_path.clone(),
                label: None,
            },
            distance,
        }),
        _ => runner_ups.first().cloned(),
    };

    MatchOutcome {
        found: resp.match_found,
        best,
        confidence: resp.confidence,
        runner_ups,
        threshold: resp.threshold,
        skipped: 0,
        message: resp.message,
    }
}
