//! Storage port: persist crop images and hand back serveable URLs.

use crate::error::PortError;
use crate::ports::Provenance;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Blob persistence keyed by relative paths like
/// `{set_id}/questions/q_001.png`.
#[async_trait]
pub trait StoragePort: Send + Sync {
    fn name(&self) -> &str;
    fn provenance(&self) -> Provenance;

    /// Persist bytes under `key` and return a retrievable URL.
    async fn save_bytes(
        &self,
        key: &str,
        data: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, PortError>;

    /// Resolve the URL a key would be served from.
    fn build_url(&self, key: &str) -> String;
}

/// Keys are caller-assembled; refuse anything that could escape the base
/// directory.
fn validate_key(provider: &str, key: &str) -> Result<(), PortError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key
            .split('/')
            .any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(PortError::Request {
            provider: provider.to_string(),
            detail: format!("invalid storage key: {key:?}"),
        });
    }
    Ok(())
}

/// Filesystem storage under one base directory, served at `/uploads/{key}`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

#[async_trait]
impl StoragePort for LocalStorage {
    fn name(&self) -> &str {
        "local"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Real
    }

    async fn save_bytes(
        &self,
        key: &str,
        data: &[u8],
        _content_type: Option<&str>,
    ) -> Result<String, PortError> {
        validate_key(self.name(), key)?;
        let dest = self.base_dir.join(key);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&dest, data).await?;
        Ok(self.build_url(key))
    }

    fn build_url(&self, key: &str) -> String {
        format!("/uploads/{key}")
    }
}

/// In-memory storage for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs stored so far.
    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.lock().await.is_empty()
    }

    /// Copy of the blob stored under `key`, if any.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs.lock().await.get(key).cloned()
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn provenance(&self) -> Provenance {
        Provenance::Mock
    }

    async fn save_bytes(
        &self,
        key: &str,
        data: &[u8],
        _content_type: Option<&str>,
    ) -> Result<String, PortError> {
        validate_key(self.name(), key)?;
        self.blobs
            .lock()
            .await
            .insert(key.to_string(), data.to_vec());
        Ok(self.build_url(key))
    }

    fn build_url(&self, key: &str) -> String {
        format!("/uploads/{key}")
    }
}
