//! Matching backends behind `/api/match`.
//!
//! Three interchangeable ways to turn a request into a [`MatchOutcome`]:
//! client-computed descriptors matched locally, images embedded by the
//! embedding server then matched locally, or images sent to a remote
//! identify service. The method is chosen per request, falling back to the
//! configured default.

use crate::config::Config;
use crate::embedder::{EmbedderClient, EmbedderError};
use crate::engine::{EngineError, EngineHandle};
use crate::external::{ExternalClient, ExternalError};
use crate::images::{self, ImageError};
use recordai_core::{average, Embedding, EmbeddingSpace, MatchError, MatchOutcome, SamplingError};
use recordai_store::{PeopleStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("no face detected: {0}")]
    NoFaceDetected(String),
    #[error("samples disagree: {0}")]
    DimensionMismatch(#[from] SamplingError),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("matcher error: {0}")]
    Engine(EngineError),
}

impl From<EngineError> for IdentifyError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Match(MatchError::InvalidQuery(msg)) => IdentifyError::InvalidInput(msg),
            other => IdentifyError::Engine(other),
        }
    }
}

impl From<ImageError> for IdentifyError {
    fn from(e: ImageError) -> Self {
        IdentifyError::InvalidInput(e.to_string())
    }
}

impl From<ExternalError> for IdentifyError {
    fn from(e: ExternalError) -> Self {
        match e {
            ExternalError::Rejected(msg) => IdentifyError::NoFaceDetected(msg),
            other => IdentifyError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// What a client sent, already pulled out of the request body.
#[derive(Debug, Default, Clone)]
pub struct IdentifyInput {
    /// Base64 images or data URIs, in capture order.
    pub images: Vec<String>,
    /// Client-computed descriptors, in capture order.
    pub descriptors: Vec<Vec<f32>>,
    pub threshold: Option<f32>,
}

impl IdentifyInput {
    fn threshold_or(&self, default: f32) -> Result<f32, IdentifyError> {
        match self.threshold {
            None => Ok(default),
            Some(t) if t.is_finite() && t > 0.0 => Ok(t),
            Some(t) => Err(IdentifyError::InvalidInput(format!(
                "threshold must be a positive number, got {t}"
            ))),
        }
    }

    fn descriptor_samples(&self) -> Result<Vec<Embedding>, IdentifyError> {
        if self.descriptors.iter().any(|d| d.is_empty()) {
            return Err(IdentifyError::InvalidInput("face descriptor is empty".into()));
        }
        Ok(self.descriptors.iter().cloned().map(Embedding::new).collect())
    }
}

/// Store and matcher shared by the locally-matching backends.
#[derive(Clone)]
pub struct Matching {
    pub store: Arc<PeopleStore>,
    pub engine: EngineHandle,
}

impl Matching {
    async fn rank(
        &self,
        space: EmbeddingSpace,
        samples: &[Embedding],
        threshold: f32,
    ) -> Result<MatchOutcome, IdentifyError> {
        let query = average(samples)?;
        let people = self.store.fetch(space).await?;
        tracing::debug!(space = %space, samples = samples.len(), people = people.len(), "ranking query");
        Ok(self.engine.identify(space, query, people, threshold).await?)
    }
}

pub struct DescriptorBackend {
    threshold: f32,
}

pub struct EmbedderBackend {
    client: EmbedderClient,
    threshold: f32,
}

pub struct ExternalBackend {
    client: ExternalClient,
    threshold: f32,
}

pub enum Backend {
    Descriptor(DescriptorBackend),
    Embedder(EmbedderBackend),
    External(ExternalBackend),
}

impl Backend {
    pub fn space(&self) -> EmbeddingSpace {
        match self {
            Backend::Descriptor(_) => EmbeddingSpace::FaceApi,
            Backend::Embedder(_) => EmbeddingSpace::DeepFace,
            Backend::External(_) => EmbeddingSpace::External,
        }
    }

    pub fn default_threshold(&self) -> f32 {
        match self {
            Backend::Descriptor(b) => b.threshold,
            Backend::Embedder(b) => b.threshold,
            Backend::External(b) => b.threshold,
        }
    }

    /// Threshold a request would be judged against, for error responses.
    pub fn effective_threshold(&self, input: &IdentifyInput) -> f32 {
        input
            .threshold
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or_else(|| self.default_threshold())
    }

    async fn identify(
        &self,
        matching: &Matching,
        input: &IdentifyInput,
    ) -> Result<MatchOutcome, IdentifyError> {
        let threshold = input.threshold_or(self.default_threshold())?;
        match self {
            Backend::Descriptor(_) => {
                if input.descriptors.is_empty() {
                    return Err(IdentifyError::InvalidInput(
                        "Please provide face_descriptor or face_descriptors".into(),
                    ));
                }
                let samples = input.descriptor_samples()?;
                matching.rank(self.space(), &samples, threshold).await
            }
            Backend::Embedder(b) => {
                let samples = if !input.images.is_empty() {
                    b.embed_all(&input.images).await?
                } else if !input.descriptors.is_empty() {
                    input.descriptor_samples()?
                } else {
                    return Err(IdentifyError::InvalidInput(
                        "Please provide image, images or face_descriptors".into(),
                    ));
                };
                matching.rank(self.space(), &samples, threshold).await
            }
            Backend::External(b) => {
                let Some(image) = input.images.first() else {
                    return Err(IdentifyError::InvalidInput("Please provide an image".into()));
                };
                // Validate locally so a garbage payload is a 400, not an upstream error.
                images::decode_base64(image)?;
                if input.images.len() > 1 {
                    tracing::debug!(
                        ignored = input.images.len() - 1,
                        "external backend uses the first image only"
                    );
                }
                Ok(b.client.identify(image, threshold).await?)
            }
        }
    }
}

impl EmbedderBackend {
    /// Embed every image. Samples the server refuses are skipped; the call
    /// fails only when no sample produced an embedding.
    async fn embed_all(&self, payloads: &[String]) -> Result<Vec<Embedding>, IdentifyError> {
        let mut jpegs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            jpegs.push(images::decode_payload(payload)?);
        }

        let mut samples = Vec::with_capacity(jpegs.len());
        let mut last_rejection = None;
        let mut last_failure = None;
        for (index, jpeg) in jpegs.into_iter().enumerate() {
            match self.client.embed(jpeg, index).await {
                Ok(embedding) => samples.push(embedding),
                Err(EmbedderError::Rejected { detail, .. }) => {
                    tracing::warn!(sample = index, %detail, "embedding server rejected sample");
                    last_rejection = Some(detail);
                }
                Err(e) => {
                    tracing::warn!(sample = index, error = %e, "embedding failed for sample");
                    last_failure = Some(e.to_string());
                }
            }
        }

        if samples.is_empty() {
            return Err(match (last_rejection, last_failure) {
                (Some(detail), _) => IdentifyError::NoFaceDetected(detail),
                (None, Some(err)) => IdentifyError::UpstreamUnavailable(err),
                (None, None) => IdentifyError::InvalidInput("no images to embed".into()),
            });
        }
        if samples.len() < payloads.len() {
            tracing::info!(used = samples.len(), sent = payloads.len(), "averaging partial samples");
        }
        Ok(samples)
    }
}

/// All configured backends plus the shared matching resources.
pub struct Backends {
    default: EmbeddingSpace,
    backends: Vec<Backend>,
    matching: Matching,
}

impl Backends {
    /// Build the descriptor backend always, and the embedder and external
    /// backends when their URLs are configured.
    pub fn from_config(
        config: &Config,
        store: Arc<PeopleStore>,
        engine: EngineHandle,
    ) -> anyhow::Result<Self> {
        let timeout = config.upstream_timeout();
        let mut backends = vec![Backend::Descriptor(DescriptorBackend {
            threshold: config.threshold(EmbeddingSpace::FaceApi),
        })];
        if let Some(url) = &config.embedder_url {
            backends.push(Backend::Embedder(EmbedderBackend {
                client: EmbedderClient::new(url, timeout)?,
                threshold: config.threshold(EmbeddingSpace::DeepFace),
            }));
        }
        if let Some(url) = &config.external_url {
            backends.push(Backend::External(ExternalBackend {
                client: ExternalClient::new(url, timeout)?,
                threshold: config.threshold(EmbeddingSpace::External),
            }));
        }
        if !backends.iter().any(|b| b.space() == config.default_method) {
            anyhow::bail!("default method {} is not configured", config.default_method);
        }
        tracing::info!(
            methods = ?backends.iter().map(|b| b.space().as_str()).collect::<Vec<_>>(),
            default = %config.default_method,
            "matching backends ready"
        );
        Ok(Self {
            default: config.default_method,
            backends,
            matching: Matching { store, engine },
        })
    }

    pub fn default_method(&self) -> EmbeddingSpace {
        self.default
    }

    pub fn methods(&self) -> Vec<EmbeddingSpace> {
        self.backends.iter().map(Backend::space).collect()
    }

    /// Configured threshold of `space`, or its built-in default when the
    /// backend is not enabled.
    pub fn threshold(&self, space: EmbeddingSpace) -> f32 {
        self.backends
            .iter()
            .find(|b| b.space() == space)
            .map(Backend::default_threshold)
            .unwrap_or_else(|| space.default_threshold())
    }

    pub fn store(&self) -> &PeopleStore {
        &self.matching.store
    }

    /// Resolve a request's method name (or the default) to a backend.
    pub fn select(&self, method: Option<&str>) -> Result<&Backend, IdentifyError> {
        let space = match method.map(str::trim).filter(|m| !m.is_empty()) {
            None => self.default,
            Some(name) => name
                .parse::<EmbeddingSpace>()
                .map_err(|e| IdentifyError::InvalidInput(e.to_string()))?,
        };
        self.backends
            .iter()
            .find(|b| b.space() == space)
            .ok_or_else(|| IdentifyError::InvalidInput(format!("method {space} is not enabled")))
    }

    pub async fn identify(
        &self,
        backend: &Backend,
        input: &IdentifyInput,
    ) -> Result<MatchOutcome, IdentifyError> {
        backend.identify(&self.matching, input).await
    }
}
