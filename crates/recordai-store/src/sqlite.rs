//! Local known-people store on SQLite.
//!
//! One row per person plus one row per (person, embedding space). Vectors are
//! little-endian f32 blobs with their length kept alongside.

use crate::{check_dimensions, StoreError};
use recordai_core::{Embedding, EmbeddingSpace, KnownPerson, PersonProfile};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS known_people (
    id               TEXT PRIMARY KEY,
    full_name        TEXT NOT NULL,
    linkedin_content TEXT,
    discord_username TEXT,
    photo_path       TEXT,
    label            TEXT,
    created_at       TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS face_embeddings (
    person_id TEXT NOT NULL REFERENCES known_people(id) ON DELETE CASCADE,
    space     TEXT NOT NULL,
    dims      INTEGER NOT NULL,
    vector    BLOB NOT NULL,
    PRIMARY KEY (person_id, space)
);
";

/// A person as listed by enrollment tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StoredPerson {
    #[serde(flatten)]
    pub profile: PersonProfile,
    pub spaces: Vec<EmbeddingSpace>,
    pub created_at: String,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open or create the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "opened known-people database");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "foreign_keys", 1)?;
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn fetch(&self, space: EmbeddingSpace) -> Result<Vec<KnownPerson>, StoreError> {
        if space.dimensions().is_none() {
            return Err(StoreError::UnsupportedSpace(space));
        }
        let space_key = space.as_str();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.full_name, p.linkedin_content, p.discord_username,
                            p.photo_path, p.label, e.dims, e.vector
                     FROM known_people p
                     JOIN face_embeddings e ON e.person_id = p.id
                     WHERE e.space = ?1
                     ORDER BY p.created_at, p.id",
                )?;
                let rows = stmt
                    .query_map(params![space_key], |row| {
                        Ok((
                            PersonProfile {
                                id: row.get(0)?,
                                full_name: row.get(1)?,
                                linkedin_content: row.get(2)?,
                                discord_username: row.get(3)?,
                                photo_path: row.get(4)?,
                                label: row.get(5)?,
                            },
                            row.get::<_, i64>(6)?,
                            row.get::<_, Vec<u8>>(7)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(profile, dims, blob)| {
                let values = decode_vector(&blob, dims)
                    .map_err(|e| StoreError::Decode(format!("embedding for {}: {e}", profile.id)))?;
                Ok(KnownPerson {
                    profile,
                    embedding: Embedding::new(values),
                })
            })
            .collect()
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        let n = self
            .conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM known_people", [], |r| r.get(0))?;
                Ok(n)
            })
            .await?;
        Ok(n.max(0) as usize)
    }

    /// Insert or update a person and their embedding in `space`.
    ///
    /// Profile fields are overwritten; embeddings in other spaces are kept.
    pub async fn upsert(
        &self,
        profile: PersonProfile,
        space: EmbeddingSpace,
        embedding: Embedding,
    ) -> Result<(), StoreError> {
        check_dimensions(space, &embedding.values)?;
        if profile.id.trim().is_empty() || profile.full_name.trim().is_empty() {
            return Err(StoreError::Decode("person needs an id and a full name".into()));
        }
        let dims = embedding.len() as i64;
        let vector = encode_vector(&embedding.values);
        let created_at = chrono::Utc::now().to_rfc3339();
        let space_key = space.as_str();
        let id = profile.id.clone();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO known_people (
                        id, full_name, linkedin_content, discord_username, photo_path, label, created_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(id) DO UPDATE SET
                        full_name = excluded.full_name,
                        linkedin_content = excluded.linkedin_content,
                        discord_username = excluded.discord_username,
                        photo_path = excluded.photo_path,
                        label = excluded.label",
                    params![
                        profile.id,
                        profile.full_name,
                        profile.linkedin_content,
                        profile.discord_username,
                        profile.photo_path,
                        profile.label,
                        created_at
                    ],
                )?;
                tx.execute(
                    "INSERT INTO face_embeddings (person_id, space, dims, vector) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(person_id, space) DO UPDATE SET
                        dims = excluded.dims,
                        vector = excluded.vector",
                    params![profile.id, space_key, dims, vector],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::info!(person = %id, space = %space, "stored embedding");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<StoredPerson>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT p.id, p.full_name, p.linkedin_content, p.discord_username,
                            p.photo_path, p.label, p.created_at, GROUP_CONCAT(e.space)
                     FROM known_people p
                     LEFT JOIN face_embeddings e ON e.person_id = p.id
                     GROUP BY p.id
                     ORDER BY p.created_at, p.id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            PersonProfile {
                                id: row.get(0)?,
                                full_name: row.get(1)?,
                                linkedin_content: row.get(2)?,
                                discord_username: row.get(3)?,
                                photo_path: row.get(4)?,
                                label: row.get(5)?,
                            },
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(profile, created_at, spaces)| {
                let mut spaces: Vec<EmbeddingSpace> = spaces
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|s| s.parse().ok())
                    .collect();
                spaces.sort_by_key(|s| s.as_str());
                StoredPerson {
                    profile,
                    spaces,
                    created_at,
                }
            })
            .collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<PersonProfile>, StoreError> {
        let id = id.to_string();
        let profile = self
            .conn
            .call(move |conn| {
                let profile = conn
                    .query_row(
                        "SELECT id, full_name, linkedin_content, discord_username, photo_path, label
                         FROM known_people WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(PersonProfile {
                                id: row.get(0)?,
                                full_name: row.get(1)?,
                                linkedin_content: row.get(2)?,
                                discord_username: row.get(3)?,
                                photo_path: row.get(4)?,
                                label: row.get(5)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(profile)
            })
            .await?;
        Ok(profile)
    }

    /// Remove a person and all their embeddings. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM known_people WHERE id = ?1", params![id])?))
            .await?;
        Ok(deleted > 0)
    }
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(values));
    for &value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8], dims: i64) -> Result<Vec<f32>, String> {
    let dims = usize::try_from(dims).map_err(|_| format!("invalid dimension count {dims}"))?;
    let expected = dims
        .checked_mul(std::mem::size_of::<f32>())
        .ok_or_else(|| "dimension count overflows".to_string())?;
    if blob.len() != expected {
        return Err(format!(
            "invalid byte length: expected {expected}, got {}",
            blob.len()
        ));
    }
    let mut out = Vec::with_capacity(dims);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err("non-finite value".to_string());
        }
        out.push(value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, name: &str) -> PersonProfile {
        PersonProfile {
            id: id.into(),
            full_name: name.into(),
            discord_username: Some(format!("{name}#0001")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_upsert_and_fetch_by_space() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.1; 128]))
            .await
            .unwrap();
        store
            .upsert(profile("b", "Bob"), EmbeddingSpace::DeepFace, Embedding::new(vec![0.2; 512]))
            .await
            .unwrap();

        let faceapi = store.fetch(EmbeddingSpace::FaceApi).await.unwrap();
        assert_eq!(faceapi.len(), 1);
        assert_eq!(faceapi[0].profile.full_name, "Alice");
        assert_eq!(faceapi[0].profile.discord_username.as_deref(), Some("Alice#0001"));
        assert_eq!(faceapi[0].embedding.len(), 128);

        let deepface = store.fetch(EmbeddingSpace::DeepFace).await.unwrap();
        assert_eq!(deepface.len(), 1);
        assert_eq!(deepface[0].profile.id, "b");
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_upsert_updates_profile_and_keeps_other_spaces() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.1; 128]))
            .await
            .unwrap();
        store
            .upsert(profile("a", "Alice Smith"), EmbeddingSpace::DeepFace, Embedding::new(vec![0.3; 512]))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let listed = store.list().await.unwrap();
        assert_eq!(listed[0].profile.full_name, "Alice Smith");
        assert_eq!(listed[0].spaces, vec![EmbeddingSpace::DeepFace, EmbeddingSpace::FaceApi]);
        assert_eq!(store.fetch(EmbeddingSpace::FaceApi).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimensions() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let err = store
            .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.1; 512]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEmbedding(_)));

        let err = store
            .upsert(profile("a", "Alice"), EmbeddingSpace::External, Embedding::new(vec![0.1; 4]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSpace(EmbeddingSpace::External)));
    }

    #[tokio::test]
    async fn test_remove_cascades() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.1; 128]))
            .await
            .unwrap();
        let found = store.get("a").await.unwrap().unwrap();
        assert_eq!(found.full_name, "Alice");
        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert!(store.fetch(EmbeddingSpace::FaceApi).await.unwrap().is_empty());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("people.db");
        {
            let store = SqliteStore::open(&path).await.unwrap();
            store
                .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.5; 128]))
                .await
                .unwrap();
        }
        let store = SqliteStore::open(&path).await.unwrap();
        let people = store.fetch(EmbeddingSpace::FaceApi).await.unwrap();
        assert_eq!(people[0].embedding.values[0], 0.5);
    }

    #[test]
    fn test_vector_blob_layout() {
        let blob = encode_vector(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_vector(&blob, 2).unwrap(), vec![1.0, -2.5]);
        assert!(decode_vector(&blob, 3).unwrap_err().contains("byte length"));
        assert!(decode_vector(&encode_vector(&[f32::NAN]), 1).is_err());
    }

    #[tokio::test]
    async fn test_corrupt_vector_is_a_decode_error() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store
            .upsert(profile("a", "Alice"), EmbeddingSpace::FaceApi, Embedding::new(vec![0.1; 128]))
            .await
            .unwrap();
        store
            .conn
            .call(|conn| {
                conn.execute("UPDATE face_embeddings SET vector = x'0000'", [])?;
                Ok(())
            })
            .await
            .unwrap();
        let err = store.fetch(EmbeddingSpace::FaceApi).await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.fetch(EmbeddingSpace::DeepFace).await.unwrap().is_empty());
        assert!(store.list().await.unwrap().is_empty());
    }
}
