//! Client for the embedding server (`POST /calculate-embedding`).

use recordai_core::Embedding;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding server unreachable: {0}")]
    Http(#[from] reqwest::Error),
    /// The server looked at the image and refused it (usually: no face).
    #[error("embedding server rejected image ({status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("embedding server failed ({status}): {detail}")]
    Failed { status: u16, detail: String },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
    #[serde(default)]
    dimensions: Option<usize>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "error")]
    detail: Option<String>,
}

#[derive(Clone)]
pub struct EmbedderClient {
    client: reqwest::Client,
    endpoint: String,
}

impl EmbedderClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbedderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/calculate-embedding", base_url.trim_end_matches('/')),
        })
    }

    /// Compute the embedding of one JPEG image.
    pub async fn embed(&self, jpeg: Vec<u8>, index: usize) -> Result<Embedding, EmbedderError> {
        let part = Part::bytes(jpeg)
            .file_name(format!("sample_{index}.jpg"))
            .mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let response = self.client.post(&self.endpoint).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|b| b.detail)
                .unwrap_or(text);
            // Only a complaint about the image itself is the caller's fault.
            let image_problem = matches!(status.as_u16(), 400 | 422);
            return Err(if image_problem {
                EmbedderError::Rejected {
                    status: status.as_u16(),
                    detail,
                }
            } else {
                EmbedderError::Failed {
                    status: status.as_u16(),
                    detail,
                }
            });
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::Malformed(e.to_string()))?;
        if body.embedding.is_empty() {
            return Err(EmbedderError::Malformed("empty embedding".into()));
        }
        if let Some(dims) = body.dimensions {
            if dims != body.embedding.len() {
                return Err(EmbedderError::Malformed(format!(
                    "declared {dims} dimensions, got {}",
                    body.embedding.len()
                )));
            }
        }
        tracing::debug!(
            sample = index,
            dimensions = body.embedding.len(),
            model = body.model.as_deref().unwrap_or("unknown"),
            "embedding computed"
        );
        Ok(Embedding::new(body.embedding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn calculate(mut multipart: Multipart) -> (StatusCode, Json<Value>) {
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some("file") {
                let bytes = field.bytes().await.unwrap_or_default();
                if bytes.as_ref() == b"noface" {
                    return (StatusCode::BAD_REQUEST, Json(json!({"detail": "No face detected"})));
                }
                if bytes.as_ref() == b"ratelimited" {
                    return (StatusCode::TOO_MANY_REQUESTS, Json(json!({"detail": "slow down"})));
                }
                if bytes.as_ref() == b"mismatch" {
                    return (
                        StatusCode::OK,
                        Json(json!({"embedding": [1.0, 2.0], "dimensions": 512})),
                    );
                }
                return (
                    StatusCode::OK,
                    Json(json!({"embedding": [0.5, 0.25, 0.125], "dimensions": 3, "model": "Facenet512"})),
                );
            }
        }
        (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "file missing"})))
    }

    async fn spawn_fake_embedder() -> String {
        let app = Router::new().route("/calculate-embedding", post(calculate));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn test_embed_success() {
        let url = spawn_fake_embedder().await;
        let client = EmbedderClient::new(&url, Duration::from_secs(5)).unwrap();
        let emb = client.embed(b"face".to_vec(), 0).await.unwrap();
        assert_eq!(emb.values, vec![0.5, 0.25, 0.125]);
    }

    #[tokio::test]
    async fn test_no_face_is_rejected() {
        let url = spawn_fake_embedder().await;
        let client = EmbedderClient::new(&url, Duration::from_secs(5)).unwrap();
        match client.embed(b"noface".to_vec(), 1).await {
            Err(EmbedderError::Rejected { status, detail }) => {
                assert_eq!(status, 400);
                assert_eq!(detail, "No face detected");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_an_upstream_failure() {
        let url = spawn_fake_embedder().await;
        let client = EmbedderClient::new(&url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.embed(b"ratelimited".to_vec(), 0).await,
            Err(EmbedderError::Failed { status: 429, .. })
        ));
    }

    #[tokio::test]
    async fn test_declared_dimensions_must_agree() {
        let url = spawn_fake_embedder().await;
        let client = EmbedderClient::new(&url, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            client.embed(b"mismatch".to_vec(), 0).await,
            Err(EmbedderError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = EmbedderClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.embed(b"face".to_vec(), 0).await,
            Err(EmbedderError::Http(_))
        ));
    }
}
