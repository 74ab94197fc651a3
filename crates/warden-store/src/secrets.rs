//! Secret storage contract.
//!
//! Secret values stay on the privileged side. Anything handed to a UI or an
//! agent goes through [`SecretStatus`], which only says whether a secret is set.

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Existence flags for a set of secret names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretStatus {
    pub secrets: BTreeMap<String, bool>,
}

impl SecretStatus {
    pub fn is_set(&self, name: &str) -> bool {
        self.secrets.get(name).copied().unwrap_or(false)
    }
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, StoreError>;

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), StoreError>;

    async fn has_secret(&self, name: &str) -> Result<bool, StoreError>;

    /// Returns whether a secret was removed.
    async fn delete_secret(&self, name: &str) -> Result<bool, StoreError>;

    /// Existence flags for `names`. Never includes values.
    async fn status(&self, names: &[String]) -> Result<SecretStatus, StoreError> {
        let mut secrets = BTreeMap::new();
        for name in names {
            secrets.insert(name.clone(), self.has_secret(name).await?);
        }
        Ok(SecretStatus { secrets })
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().await.get(name).cloned())
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn has_secret(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.values.lock().await.contains_key(name))
    }

    async fn delete_secret(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.values.lock().await.remove(name).is_some())
    }
}

/// Secrets kept in a single JSON file readable only by the owner.
///
/// Values are stored as given; encryption is left to the platform keychain
/// or disk encryption.
pub struct FileSecretStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSecretStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(name))
    }

    async fn set_secret(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        values.insert(name.to_string(), value.to_string());
        self.persist(&values).await
    }

    async fn has_secret(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.contains_key(name))
    }

    async fn delete_secret(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut values = self.load().await?;
        let removed = values.remove(name).is_some();
        if removed {
            self.persist(&values).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_secret_lifecycle() {
        let store = MemorySecretStore::new();
        assert!(!store.has_secret("OPENAI_API_KEY").await.unwrap());
        store.set_secret("OPENAI_API_KEY", "sk-test").await.unwrap();
        assert_eq!(
            store.get_secret("OPENAI_API_KEY").await.unwrap().as_deref(),
            Some("sk-test")
        );
        assert!(store.delete_secret("OPENAI_API_KEY").await.unwrap());
        assert!(!store.delete_secret("OPENAI_API_KEY").await.unwrap());
    }

    #[tokio::test]
    async fn test_status_exposes_only_flags() {
        let store = MemorySecretStore::new();
        store.set_secret("a", "value-a").await.unwrap();
        let status = store
            .status(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert!(status.is_set("a"));
        assert!(!status.is_set("b"));
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("value-a"));
    }

    #[tokio::test]
    async fn test_file_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        FileSecretStore::new(&path)
            .set_secret("token", "abc")
            .await
            .unwrap();

        let reopened = FileSecretStore::new(&path);
        assert_eq!(reopened.get_secret("token").await.unwrap().as_deref(), Some("abc"));
        assert!(reopened.delete_secret("token").await.unwrap());
        assert!(!reopened.has_secret("token").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets.json");
        FileSecretStore::new(&path).set_secret("k", "v").await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
