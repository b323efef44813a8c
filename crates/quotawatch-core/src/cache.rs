use crate::models::Provider;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The three scalars the durable store holds. Empty string and `0` mean
/// "absent", matching what a plain settings backend can represent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredFields {
    pub last_payload: String,
    pub last_success_timestamp: i64,
    pub last_error: String,
}

/// Last-write-wins key/value backend for the cache record.
pub trait CacheStore {
    fn read(&self) -> Result<StoredFields, CacheError>;
    fn write(&mut self, fields: &StoredFields) -> Result<(), CacheError>;

    /// Replaces only the error field. The stored payload string and success
    /// timestamp are written back exactly as they were read.
    fn write_last_error(&mut self, last_error: &str) -> Result<(), CacheError> {
        let mut fields = self.read()?;
        fields.last_error = last_error.to_string();
        self.write(&fields)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheRecord {
    pub last_payload: Option<Vec<Provider>>,
    pub last_success_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl CacheRecord {
    pub fn from_fields(fields: &StoredFields) -> Self {
        let last_payload = if fields.last_payload.is_empty() {
            None
        } else {
            match serde_json::from_str::<Vec<Provider>>(&fields.last_payload) {
                Ok(providers) => Some(providers),
                Err(e) => {
                    warn!("discarding unreadable cached payload: {e}");
                    None
                }
            }
        };

        let last_success_timestamp = (fields.last_success_timestamp > 0)
            .then(|| Utc.timestamp_opt(fields.last_success_timestamp, 0).single())
            .flatten();

        Self {
            last_payload,
            last_success_timestamp,
            last_error: Some(fields.last_error.clone()).filter(|e| !e.is_empty()),
        }
    }

    pub fn to_fields(&self) -> Result<StoredFields, CacheError> {
        let last_payload = match &self.last_payload {
            Some(providers) => serde_json::to_string(providers)?,
            None => String::new(),
        };
        Ok(StoredFields {
            last_payload,
            last_success_timestamp: self
                .last_success_timestamp
                .map(|ts| ts.timestamp())
                .unwrap_or(0),
            last_error: self.last_error.clone().unwrap_or_default(),
        })
    }

    pub fn load(store: &impl CacheStore) -> Self {
        match store.read() {
            Ok(fields) => Self::from_fields(&fields),
            Err(e) => {
                warn!("starting without cache: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &mut impl CacheStore) -> Result<(), CacheError> {
        store.write(&self.to_fields()?)
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_success_timestamp
            .map(|ts| (now - ts).num_seconds())
    }
}

/// JSON file holding [`StoredFields`]. A missing file reads as empty.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self) -> Result<StoredFields, CacheError> {
        if !self.path.exists() {
            return Ok(StoredFields::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(serde_json::from_str::<StoredFields>(&raw)?)
    }

    fn write(&mut self, fields: &StoredFields) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let body = serde_json::to_string_pretty(fields)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    pub fields: StoredFields,
}

impl CacheStore for MemoryCacheStore {
    fn read(&self) -> Result<StoredFields, CacheError> {
        Ok(self.fields.clone())
    }

    fn write(&mut self, fields: &StoredFields) -> Result<(), CacheError> {
        self.fields = fields.clone();
        Ok(())
    }

    fn write_last_error(&mut self, last_error: &str) -> Result<(), CacheError> {
        self.fields.last_error = last_error.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::normalize;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record() -> CacheRecord {
        let provider = normalize(&json!({
            "provider": "claude",
            "usage": { "primary": { "usedPercent": 40, "resetsAt": "2026-10-17T12:00:00Z" } }
        }))
        .unwrap();
        CacheRecord {
            last_payload: Some(vec![provider]),
            last_success_timestamp: Utc.timestamp_opt(1_792_224_000, 0).single(),
            last_error: None,
        }
    }

    #[test]
    fn missing_file_reads_as_empty_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::new(dir.path().join("cache.json"));
        assert_eq!(CacheRecord::load(&store), CacheRecord::default());
    }

    #[test]
    fn file_store_persists_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCacheStore::new(dir.path().join("state/cache.json"));
        let original = record();
        original.save(&mut store).unwrap();
        assert_eq!(CacheRecord::load(&store), original);
    }

    #[test]
    fn repeated_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCacheStore::new(dir.path().join("cache.json"));
        let original = record();
        original.save(&mut store).unwrap();
        original.save(&mut store).unwrap();
        assert_eq!(CacheRecord::load(&store), original);
        assert!(!dir.path().join("cache.json.tmp").exists());
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        let store = FileCacheStore::new(&path);
        assert!(store.read().is_err());
        assert_eq!(CacheRecord::load(&store), CacheRecord::default());
    }

    #[test]
    fn unreadable_payload_keeps_error_field() {
        let fields = StoredFields {
            last_payload: "[{\"broken\"".to_string(),
            last_success_timestamp: 1_792_224_000,
            last_error: "timeout".to_string(),
        };
        let record = CacheRecord::from_fields(&fields);
        assert_eq!(record.last_payload, None);
        assert_eq!(record.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn error_write_keeps_payload_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let payload = r#"[ {"id": "codex", "displayName": "Codex", "primary": {"label": "Session", "usedPercent": 118.40802772857143, "remainingPercent": -18.40802772857143}} ]"#;
        let mut store = FileCacheStore::new(&path);
        store
            .write(&StoredFields {
                last_payload: payload.to_string(),
                last_success_timestamp: 1_792_224_000,
                last_error: String::new(),
            })
            .unwrap();

        store.write_last_error("not logged in").unwrap();

        let fields = store.read().unwrap();
        assert_eq!(fields.last_payload, payload);
        assert_eq!(fields.last_success_timestamp, 1_792_224_000);
        assert_eq!(fields.last_error, "not logged in");
    }

    #[test]
    fn empty_fields_mean_absent() {
        let record = CacheRecord::from_fields(&StoredFields::default());
        assert_eq!(record, CacheRecord::default());
        assert_eq!(record.to_fields().unwrap(), StoredFields::default());
    }
}
