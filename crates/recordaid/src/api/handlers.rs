//! HTTP request handlers.

use crate::api::errors::{ApiError, ContextualError};
use crate::api::models::{HealthResponse, InfoResponse, MatchRequest, MatchResponse};
use crate::backend::Backends;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backends: Arc<Backends>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(backends: Backends, max_body_bytes: usize) -> Self {
        Self {
            backends: Arc::new(backends),
            max_body_bytes,
        }
    }
}

/// `POST /api/match`: identify the face(s) in the request.
///
/// 200 for both a match and a clean "no match"; 400 for malformed input or
/// no usable face; 500 for store, matcher or upstream failures.
pub async fn match_face(
    State(state): State<AppState>,
    body: Result<Json<MatchRequest>, JsonRejection>,
) -> Result<Json<MatchResponse>, ContextualError> {
    let backends = &state.backends;
    let default = backends.default_method();
    let default_threshold = backends.threshold(default);

    let Json(request) = body.map_err(|rejection| {
        ApiError::bad_request(rejection.body_text()).with_context(default.as_str(), default_threshold)
    })?;
    let (method, input) = request.into_input();

    let backend = backends.select(method.as_deref()).map_err(|e| {
        ApiError::from(e).with_context(method.as_deref().unwrap_or(default.as_str()), default_threshold)
    })?;
    let method = backend.space().as_str();
    let threshold = backend.effective_threshold(&input);

    let outcome = backends
        .identify(backend, &input)
        .await
        .map_err(|e| ApiError::from(e).with_context(method, threshold))?;

    tracing::info!(
        method,
        found = outcome.found,
        best = outcome.best.as_ref().map(|b| b.person.full_name.as_str()),
        distance = outcome.best.as_ref().map(|b| b.distance),
        skipped = outcome.skipped,
        "match request served"
    );
    Ok(Json(MatchResponse::from_outcome(outcome, method)))
}

/// `GET /health`: always 200; `status` says whether the store answers.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backends = &state.backends;
    let store = backends.store();
    let count = store.count().await;
    let (status, connected, records, error) = match count {
        Ok(n) => ("healthy", true, Some(n), None),
        Err(e) => {
            tracing::warn!(error = %e, store = store.name(), "health check: store unreachable");
            ("unhealthy", false, None, Some(e.to_string()))
        }
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: store.name().to_string(),
            store_connected: connected,
            database_records: records,
            methods: method_names(backends),
            default_method: backends.default_method().as_str().to_string(),
            error,
        }),
    )
}

/// `GET /`: service banner.
pub async fn root(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        service: "recordai".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: vec!["POST /api/match".to_string(), "GET /health".to_string()],
        methods: method_names(&state.backends),
        default_method: state.backends.default_method().as_str().to_string(),
    })
}

fn method_names(backends: &Backends) -> Vec<String> {
    backends
        .methods()
        .into_iter()
        .map(|m| m.as_str().to_string())
        .collect()
}
