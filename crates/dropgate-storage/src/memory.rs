//! In-memory storage backend.
//!
//! Keeps saved objects in a process-local map. Used as the test double for
//! the pipeline and for ad-hoc deployments that do not need persistence.

use crate::traits::{StorageError, StorageResult, UploadStorage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dropgate_core::UploadFile;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct MemoryStorage {
    name: String,
    base_url: String,
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch a stored object by its storage key.
    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// Number of stored objects.
    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    fn key_from_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/", self.base_url.trim_end_matches('/'));
        url.strip_prefix(&prefix)
            .filter(|key| !key.is_empty())
            .map(String::from)
    }
}

#[async_trait]
impl UploadStorage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, file: &mut UploadFile) -> StorageResult<()> {
        if let Some(err) = file.error() {
            return Err(StorageError::UploadFailed(err.to_string()));
        }

        let key = file.storage_key();
        let mut stream = file.take_stream().ok_or_else(|| {
            StorageError::UploadFailed("upload stream already consumed".to_string())
        })?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| StorageError::UploadFailed(format!("Stream failed: {}", e)))?;
            buf.extend_from_slice(&chunk);
        }

        let size_bytes = buf.len();
        self.objects.write().await.insert(key.clone(), buf.freeze());
        file.set_url(self.url_for(&key));

        tracing::debug!(key = %key, size_bytes, "Memory storage save successful");
        Ok(())
    }

    fn can_remove(&self, url: &str) -> bool {
        self.key_from_url(url).is_some()
    }

    async fn remove(&self, url: &str) -> StorageResult<()> {
        let key = self
            .key_from_url(url)
            .ok_or_else(|| StorageError::NotOwned(url.to_string()))?;

        match self.objects.write().await.remove(&key) {
            Some(_) => Ok(()),
            None => Err(StorageError::NotFound(url.to_string())),
        }
    }

    async fn destroy(&self) -> StorageResult<()> {
        self.objects.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropgate_core::ByteStream;

    fn upload(name: &str, data: &'static [u8]) -> UploadFile {
        let stream: ByteStream = Box::pin(futures::stream::iter([Ok::<_, std::io::Error>(
            Bytes::from_static(data),
        )]));
        UploadFile::new(stream, name, "image/jpeg", "7bit")
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let storage = MemoryStorage::new("mem", "memory://uploads");

        let mut file = upload("photo.jpg", b"bytes");
        storage.save(&mut file).await.unwrap();

        assert_eq!(storage.object_count().await, 1);
        assert_eq!(
            storage.object(&file.storage_key()).await.unwrap(),
            Bytes::from_static(b"bytes")
        );
        assert!(file.url().unwrap().starts_with("memory://uploads/"));
    }

    #[tokio::test]
    async fn test_failed_stream_stores_nothing() {
        let storage = MemoryStorage::new("mem", "memory://uploads");

        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("aborted")),
        ]));
        let mut file = UploadFile::new(stream, "photo.jpg", "image/jpeg", "7bit");

        assert!(storage.save(&mut file).await.is_err());
        assert_eq!(storage.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_and_ownership() {
        let storage = MemoryStorage::new("mem", "memory://uploads");

        let mut file = upload("photo.jpg", b"bytes");
        storage.save(&mut file).await.unwrap();
        let url = file.url().unwrap().to_string();

        assert!(storage.can_remove(&url));
        assert!(!storage.can_remove("memory://other/photo.jpg"));
        assert!(matches!(
            storage.remove("memory://other/photo.jpg").await,
            Err(StorageError::NotOwned(_))
        ));

        storage.remove(&url).await.unwrap();
        assert!(matches!(
            storage.remove(&url).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_clears_objects() {
        let storage = MemoryStorage::new("mem", "memory://uploads");

        let mut file = upload("photo.jpg", b"bytes");
        storage.save(&mut file).await.unwrap();

        storage.destroy().await.unwrap();
        assert_eq!(storage.object_count().await, 0);
        // Idempotent.
        storage.destroy().await.unwrap();
    }
}
