//! Persistent storage for issued QR code tokens
//!
//! Uses JSON file storage in ~/.config/qrsignin/qr_tokens.json

use crate::token::QrTokenRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("QR code token not found")]
    NotFound,
    #[error("Configuration directory not found")]
    NoConfigDir,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredData {
    /// Token records indexed by token
    tokens: HashMap<String, QrTokenRecord>,
}

/// Token storage with file persistence
pub struct TokenStorage {
    path: PathBuf,
    data: Arc<RwLock<StoredData>>,
}

impl TokenStorage {
    /// Open the storage at the default location
    pub async fn new() -> StorageResult<Self> {
        let path = Self::default_path()?;
        Self::with_path(path).await
    }

    /// Create storage at a specific path
    ///
    /// Loads existing data from disk if present.
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded token storage from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse token storage, starting fresh: {}", e);
                    StoredData::default()
                }
            }
        } else {
            debug!("No existing token storage, creating new");
            StoredData::default()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Get the default storage path (~/.config/qrsignin/qr_tokens.json)
    pub fn default_path() -> StorageResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(config_dir.join("qrsignin").join("qr_tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> StorageResult<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved token storage to {:?}", self.path);
        Ok(())
    }

    /// Store a newly issued token
    pub async fn insert(&self, token: &str, record: QrTokenRecord) -> StorageResult<()> {
        {
            let mut data = self.data.write().await;
            data.tokens.insert(token.to_string(), record);
        }
        self.save().await
    }

    pub async fn get(&self, token: &str) -> Option<QrTokenRecord> {
        let data = self.data.read().await;
        data.tokens.get(token).cloned()
    }

    /// Mark a token used and attach its custom token
    pub async fn mark_used(&self, token: &str, ct: String) -> StorageResult<()> {
        {
            let mut data = self.data.write().await;
            let record = data.tokens.get_mut(token).ok_or(StorageError::NotFound)?;
            record.used = true;
            record.ct = Some(ct);
        }
        self.save().await
    }

    /// Remove a token, returning its record if it was stored
    pub async fn remove(&self, token: &str) -> StorageResult<Option<QrTokenRecord>> {
        let removed = {
            let mut data = self.data.write().await;
            data.tokens.remove(token)
        };
        if removed.is_some() {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Remove every token matching `stale`, returning how many were removed
    pub async fn remove_where<F>(&self, stale: F) -> StorageResult<usize>
    where
        F: Fn(&QrTokenRecord) -> bool,
    {
        let removed = {
            let mut data = self.data.write().await;
            let before = data.tokens.len();
            data.tokens.retain(|_, record| !stale(record));
            before - data.tokens.len()
        };
        if removed > 0 {
            self.save().await?;
        }
        Ok(removed)
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.tokens.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_storage_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        {
            let storage = TokenStorage::with_path(path.clone()).await.unwrap();
            storage
                .insert("T1", QrTokenRecord::new(1, "10.0.0.1"))
                .await
                .unwrap();
            storage.mark_used("T1", "ct-1".to_string()).await.unwrap();
        }

        let storage = TokenStorage::with_path(path).await.unwrap();
        let record = storage.get("T1").await.unwrap();
        assert!(record.used);
        assert_eq!(record.ct.as_deref(), Some("ct-1"));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let storage = TokenStorage::with_path(path).await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_and_remove_where() {
        let dir = tempdir().unwrap();
        let storage = TokenStorage::with_path(dir.path().join("tokens.json"))
            .await
            .unwrap();

        for (token, ts) in [("A", 1), ("B", 2), ("C", 3)] {
            storage
                .insert(token, QrTokenRecord::new(ts, "ip"))
                .await
                .unwrap();
        }

        assert!(storage.remove("A").await.unwrap().is_some());
        assert!(storage.remove("A").await.unwrap().is_none());
        assert!(matches!(
            storage.mark_used("A", "ct".to_string()).await,
            Err(StorageError::NotFound)
        ));

        let removed = storage.remove_where(|r| r.ts < 3).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.len().await, 1);
        assert!(storage.get("C").await.is_some());
    }
}
