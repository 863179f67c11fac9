//! recordai-store: Known-people stores.
//!
//! The matcher never caches: every match request fetches the people of one
//! embedding space fresh from whichever store was configured at startup.

pub mod sqlite;
pub mod supabase;

pub use sqlite::{SqliteStore, StoredPerson};
pub use supabase::{SupabaseConfig, SupabaseStore};

use recordai_core::{EmbeddingSpace, KnownPerson};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed record: {0}")]
    Decode(String),
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("{0} embeddings are not kept in the people store")]
    UnsupportedSpace(EmbeddingSpace),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(tokio_rusqlite::Error::Rusqlite(e))
    }
}

/// Read side of the known-people collection, selected at startup.
pub enum PeopleStore {
    Sqlite(SqliteStore),
    Supabase(SupabaseStore),
}

impl PeopleStore {
    pub fn name(&self) -> &'static str {
        match self {
            PeopleStore::Sqlite(_) => "sqlite",
            PeopleStore::Supabase(_) => "supabase",
        }
    }

    /// Every person with an embedding in `space`.
    pub async fn fetch(&self, space: EmbeddingSpace) -> Result<Vec<KnownPerson>, StoreError> {
        let people = match self {
            PeopleStore::Sqlite(s) => s.fetch(space).await?,
            PeopleStore::Supabase(s) => s.fetch(space).await?,
        };
        tracing::debug!(store = self.name(), space = %space, count = people.len(), "fetched known people");
        Ok(people)
    }

    /// Number of people records, used for health reporting.
    pub async fn count(&self) -> Result<usize, StoreError> {
        match self {
            PeopleStore::Sqlite(s) => s.count().await,
            PeopleStore::Supabase(s) => s.count().await,
        }
    }
}

pub(crate) fn check_dimensions(
    space: EmbeddingSpace,
    values: &[f32],
) -> Result<(), StoreError> {
    let expected = space.dimensions().ok_or(StoreError::UnsupportedSpace(space))?;
    if values.len() != expected {
        return Err(StoreError::InvalidEmbedding(format!(
            "{space} embeddings have {expected} dimensions, got {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbedding(
            "embedding contains NaN or infinite values".into(),
        ));
    }
    Ok(())
}
