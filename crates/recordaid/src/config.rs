use recordai_core::EmbeddingSpace;
use recordai_store::{PeopleStore, SqliteStore, StoreError, SupabaseConfig, SupabaseStore};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Sqlite,
    Supabase,
}

/// Daemon configuration.
///
/// Loaded from the TOML file named by `RECORDAI_CONFIG` (if set), then
/// overridden by `RECORDAI_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:8000).
    pub bind_addr: String,
    /// Backend used when a request names no method.
    pub default_method: EmbeddingSpace,
    pub store: StoreKind,
    /// SQLite database path.
    pub db_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub supabase_table: String,
    /// Base URL of the embedding server exposing `/calculate-embedding`.
    pub embedder_url: Option<String>,
    /// Full URL of the remote identify endpoint.
    pub external_url: Option<String>,
    /// Timeout for every outbound request, in seconds.
    pub upstream_timeout_secs: u64,
    pub faceapi_threshold: f32,
    pub deepface_threshold: f32,
    pub external_threshold: f32,
    /// Largest accepted request body (base64 images are big).
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            default_method: EmbeddingSpace::FaceApi,
            store: StoreKind::Sqlite,
            db_path: default_data_dir().join("people.db"),
            supabase_url: None,
            supabase_key: None,
            supabase_table: "known_people".to_string(),
            embedder_url: None,
            external_url: None,
            upstream_timeout_secs: 10,
            faceapi_threshold: EmbeddingSpace::FaceApi.default_threshold(),
            deepface_threshold: EmbeddingSpace::DeepFace.default_threshold(),
            external_threshold: EmbeddingSpace::External.default_threshold(),
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("recordai")
}

impl Config {
    /// Load the optional config file, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("RECORDAI_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RECORDAI_BIND") {
            self.bind_addr = v;
        }
        if let Some(method) = env_parse::<EmbeddingSpace>("RECORDAI_METHOD") {
            self.default_method = method;
        }
        if let Ok(v) = std::env::var("RECORDAI_STORE") {
            match v.to_ascii_lowercase().as_str() {
                "sqlite" => self.store = StoreKind::Sqlite,
                "supabase" => self.store = StoreKind::Supabase,
                other => tracing::warn!(value = other, "ignoring unknown RECORDAI_STORE"),
            }
        }
        if let Ok(v) = std::env::var("RECORDAI_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("RECORDAI_SUPABASE_URL") {
            self.supabase_url = Some(v);
        }
        if let Ok(v) = std::env::var("RECORDAI_SUPABASE_KEY") {
            self.supabase_key = Some(v);
        }
        if let Ok(v) = std::env::var("RECORDAI_SUPABASE_TABLE") {
            self.supabase_table = v;
        }
        if let Ok(v) = std::env::var("RECORDAI_EMBEDDER_URL") {
            self.embedder_url = Some(v);
        }
        if let Ok(v) = std::env::var("RECORDAI_EXTERNAL_URL") {
            self.external_url = Some(v);
        }
        self.upstream_timeout_secs =
            env_parse("RECORDAI_UPSTREAM_TIMEOUT_SECS").unwrap_or(self.upstream_timeout_secs);
        self.faceapi_threshold =
            env_parse("RECORDAI_FACEAPI_THRESHOLD").unwrap_or(self.faceapi_threshold);
        self.deepface_threshold =
            env_parse("RECORDAI_DEEPFACE_THRESHOLD").unwrap_or(self.deepface_threshold);
        self.external_threshold =
            env_parse("RECORDAI_EXTERNAL_THRESHOLD").unwrap_or(self.external_threshold);
        self.max_body_bytes = env_parse("RECORDAI_MAX_BODY_BYTES").unwrap_or(self.max_body_bytes);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, t) in [
            ("faceapi_threshold", self.faceapi_threshold),
            ("deepface_threshold", self.deepface_threshold),
            ("external_threshold", self.external_threshold),
        ] {
            if !t.is_finite() || t <= 0.0 {
                return Err(ConfigError::Invalid(format!("{name} must be a positive number")));
            }
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::Invalid("upstream_timeout_secs must be > 0".into()));
        }
        if self.store == StoreKind::Supabase
            && (self.supabase_url.is_none() || self.supabase_key.is_none())
        {
            return Err(ConfigError::Invalid(
                "supabase store needs supabase_url and supabase_key".into(),
            ));
        }
        let default_enabled = match self.default_method {
            EmbeddingSpace::FaceApi => true,
            EmbeddingSpace::DeepFace => self.embedder_url.is_some(),
            EmbeddingSpace::External => self.external_url.is_some(),
        };
        if !default_enabled {
            return Err(ConfigError::Invalid(format!(
                "default method {} has no backend configured",
                self.default_method
            )));
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn threshold(&self, space: EmbeddingSpace) -> f32 {
        match space {
            EmbeddingSpace::FaceApi => self.faceapi_threshold,
            EmbeddingSpace::DeepFace => self.deepface_threshold,
            EmbeddingSpace::External => self.external_threshold,
        }
    }

    /// Open the configured known-people store.
    pub async fn open_store(&self) -> Result<PeopleStore, StoreError> {
        match self.store {
            StoreKind::Sqlite => Ok(PeopleStore::Sqlite(SqliteStore::open(&self.db_path).await?)),
            StoreKind::Supabase => {
                let store = SupabaseStore::new(SupabaseConfig {
                    url: self.supabase_url.clone().unwrap_or_default(),
                    key: self.supabase_key.clone().unwrap_or_default(),
                    table: self.supabase_table.clone(),
                    timeout: self.upstream_timeout(),
                })?;
                Ok(PeopleStore::Supabase(store))
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold(EmbeddingSpace::FaceApi), 0.6);
        assert_eq!(config.threshold(EmbeddingSpace::DeepFace), 1.0);
        assert_eq!(config.upstream_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("recordaid.toml");
        std::fs::write(
            &path,
            r#"
bind_addr = "127.0.0.1:9000"
default_method = "deepface"
embedder_url = "http://localhost:8001"
deepface_threshold = 1.2
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.default_method, EmbeddingSpace::DeepFace);
        assert_eq!(config.deepface_threshold, 1.2);
        assert_eq!(config.faceapi_threshold, 0.6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_toml_is_a_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "default_method = \"sift\"").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_method_needs_backend() {
        let config = Config {
            default_method: EmbeddingSpace::External,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_supabase_needs_credentials() {
        let config = Config {
            store: StoreKind::Supabase,
            supabase_url: Some("https://example.supabase.co".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_positive_threshold() {
        let config = Config {
            faceapi_threshold: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
