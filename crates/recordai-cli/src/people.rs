//! Out-of-band management of the local SQLite people store.

use anyhow::{Context, Result};
use recordai_core::{Embedding, EmbeddingSpace, PersonProfile};
use recordai_store::SqliteStore;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// One entry of an import file.
#[derive(Debug, Deserialize)]
pub struct ImportRecord {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub linkedin_content: Option<String>,
    #[serde(default)]
    pub discord_username: Option<String>,
    #[serde(default)]
    pub photo_path: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    /// Embeddings keyed by space name.
    pub embeddings: HashMap<EmbeddingSpace, Vec<f32>>,
}

#[derive(Debug, Default, PartialEq)]
pub struct ImportReport {
    pub people: usize,
    pub embeddings: usize,
    pub rejected: Vec<String>,
}

pub fn parse_import(raw: &str) -> Result<Vec<ImportRecord>> {
    serde_json::from_str(raw).context("import file must be a JSON array of people")
}

pub async fn import(store: &SqliteStore, records: Vec<ImportRecord>) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for record in records {
        let profile = PersonProfile {
            id: record
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            full_name: record.full_name,
            linkedin_content: record.linkedin_content,
            discord_username: record.discord_username,
            photo_path: record.photo_path,
            label: record.label,
        };
        let mut stored = 0;
        for (space, values) in record.embeddings {
            match store
                .upsert(profile.clone(), space, Embedding::new(values))
                .await
            {
                Ok(()) => stored += 1,
                Err(e) => {
                    tracing::warn!(person = %profile.full_name, space = %space, error = %e, "rejected embedding");
                    report
                        .rejected
                        .push(format!("{} ({space}): {e}", profile.full_name));
                }
            }
        }
        if stored > 0 {
            report.people += 1;
            report.embeddings += stored;
        }
    }
    Ok(report)
}

pub async fn import_file(store: &SqliteStore, path: &Path) -> Result<ImportReport> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    import(store, parse_import(&raw)?).await
}
