//! Remote known-people store on Supabase, read through its PostgREST API.
//!
//! The `known_people` table keeps one column per embedding space. Vector
//! columns come back either as JSON arrays or, for pgvector columns, as text
//! such as `"[0.1,0.2]"`.

use crate::StoreError;
use recordai_core::{Embedding, EmbeddingSpace, KnownPerson, PersonProfile};
use serde_json::{Map, Value};
use std::time::Duration;

const PROFILE_COLUMNS: &str = "id,full_name,linkedin_content,discord_username,photo_path,label";

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://<ref>.supabase.co`.
    pub url: String,
    /// Anon or service key, sent as `apikey` and bearer token.
    pub key: String,
    pub table: String,
    pub timeout: Duration,
}

pub struct SupabaseStore {
    client: reqwest::Client,
    config: SupabaseConfig,
}

/// Columns holding vectors for `space`, in order of preference.
fn embedding_columns(space: EmbeddingSpace) -> Option<&'static [&'static str]> {
    match space {
        EmbeddingSpace::FaceApi => Some(&["face_encoding_faceapi"]),
        EmbeddingSpace::DeepFace => Some(&["face_encoding_deepface_512", "face_encoding"]),
        EmbeddingSpace::External => None,
    }
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.url.trim_end_matches('/'),
            self.config.table
        )
    }

    fn get(&self, query: &[(&str, String)]) -> reqwest::RequestBuilder {
        self.client
            .get(self.table_url())
            .query(query)
            .header("apikey", &self.config.key)
            .bearer_auth(&self.config.key)
    }

    pub async fn fetch(&self, space: EmbeddingSpace) -> Result<Vec<KnownPerson>, StoreError> {
        let columns = embedding_columns(space).ok_or(StoreError::UnsupportedSpace(space))?;

        let mut query = vec![("select", format!("{PROFILE_COLUMNS},{}", columns.join(",")))];
        if let [only] = columns {
            query.push((*only, "not.is.null".to_string()));
        }

        let response = self.get(&query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let rows: Vec<Map<String, Value>> = response.json().await?;
        let mut people = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_row(row, columns) {
                Ok(Some(person)) => people.push(person),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "skipping malformed known_people row"),
            }
        }
        Ok(people)
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let response = self
            .get(&[("select", "id".to_string()), ("limit", "1".to_string())])
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let total = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total);
        match total {
            Some(n) => Ok(n),
            None => {
                let rows: Vec<Value> = response.json().await?;
                Ok(rows.len())
            }
        }
    }
}

/// Total from a PostgREST `Content-Range` header such as `0-0/42`.
fn parse_content_range_total(header: &str) -> Option<usize> {
    header.rsplit('/').next()?.trim().parse().ok()
}

fn opt_string(row: &Map<String, Value>, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn parse_vector(value: &Value) -> Result<Option<Vec<f32>>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(_) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("embedding array: {e}"))),
        Value::String(s) => serde_json::from_str(s)
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("embedding text: {e}"))),
        other => Err(StoreError::Decode(format!("unexpected embedding value: {other}"))),
    }
}

/// Build a person from one row. `Ok(None)` when the row has no vector in any
/// of `columns`.
fn parse_row(row: &Map<String, Value>, columns: &[&str]) -> Result<Option<KnownPerson>, StoreError> {
    let id = opt_string(row, "id").ok_or_else(|| StoreError::Decode("row without id".into()))?;
    let full_name = opt_string(row, "full_name")
        .ok_or_else(|| StoreError::Decode(format!("row {id} without full_name")))?;

    let mut values = None;
    for column in columns {
        if let Some(v) = row.get(*column) {
            if let Some(parsed) = parse_vector(v)? {
                if !parsed.is_empty() {
                    values = Some(parsed);
                    break;
                }
            }
        }
    }
    let Some(values) = values else {
        return Ok(None);
    };

    Ok(Some(KnownPerson {
        profile: PersonProfile {
            id,
            full_name,
            linkedin_content: opt_string(row, "linkedin_content"),
            discord_username: opt_string(row, "discord_username"),
            photo_path: opt_string(row, "photo_path"),
            label: opt_string(row, "label"),
        },
        embedding: Embedding::new(values),
    }))
}
