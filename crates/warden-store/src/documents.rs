//! Key-value storage for JSON documents such as agent definitions.

use crate::audit::now_ms;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// CRUD over documents keyed by id.
#[async_trait]
pub trait DocumentStore<T: Send + Sync>: Send + Sync {
    /// Every stored document, ordered by id.
    async fn list(&self) -> Result<Vec<T>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Insert or replace the document stored under `id`.
    async fn save(&self, id: &str, document: &T) -> Result<(), StoreError>;

    /// Returns whether a document was removed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDocument<T> {
    id: String,
    updated_at: u64,
    document: T,
}

/// One JSON file per document. File names are hashed so arbitrary ids are safe on disk.
pub struct JsonFileStore<T> {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, id: &str) -> PathBuf {
        let hash = blake3::hash(id.as_bytes());
        self.dir.join(format!("{}.json", &hash.to_hex()[..32]))
    }
}

impl<T: DeserializeOwned> JsonFileStore<T> {
    async fn read(&self, path: &Path) -> Result<Option<StoredDocument<T>>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map(Some).map_err(|e| {
                StoreError::InvalidFormat(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<T> DocumentStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Vec<T>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut dir = fs::read_dir(&self.dir).await?;
        let mut stored = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                match self.read(&path).await {
                    Ok(Some(doc)) => stored.push(doc),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable document"),
                }
            }
        }
        stored.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(stored.into_iter().map(|s| s.document).collect())
    }

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self
            .read(&self.document_path(id))
            .await?
            .filter(|s| s.id == id)
            .map(|s| s.document))
    }

    async fn save(&self, id: &str, document: &T) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;
        let stored = StoredDocument {
            id: id.to_string(),
            updated_at: now_ms(),
            document,
        };
        let content = serde_json::to_string_pretty(&stored)?;

        let path = self.document_path(id);
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;
        tracing::debug!(id, path = %path.display(), "Saved document");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.document_path(id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory document store.
pub struct MemoryDocumentStore<T> {
    documents: Mutex<BTreeMap<String, T>>,
}

impl<T> MemoryDocumentStore<T> {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<T> Default for MemoryDocumentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> DocumentStore<T> for MemoryDocumentStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn list(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.documents.lock().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        Ok(self.documents.lock().await.get(id).cloned())
    }

    async fn save(&self, id: &str, document: &T) -> Result<(), StoreError> {
        self.documents
            .lock()
            .await
            .insert(id.to_string(), document.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.documents.lock().await.remove(id).is_some())
    }
}
