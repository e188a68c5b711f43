use crate::traits::{StorageError, StorageResult, UploadStorage};
use async_trait::async_trait;
use dropgate_core::UploadFile;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::StreamReader;

/// Local filesystem storage backend
#[derive(Clone)]
pub struct LocalStorage {
    name: String,
    base_path: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `name` - Instance name for registry lookups
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/dropgate/uploads")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:4000/uploads")
    pub async fn new(
        name: impl Into<String>,
        base_path: impl Into<PathBuf>,
        base_url: impl Into<String>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            name: name.into(),
            base_path,
            base_url: base_url.into(),
        })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Keys containing path traversal sequences or a leading slash never
    /// map to a path.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        if storage_key.is_empty()
            || storage_key.starts_with('/')
            || storage_key.split('/').any(|segment| segment == "..")
        {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }
        Ok(self.base_path.join(storage_key))
    }

    /// Generate public URL for a storage key
    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    /// Map a public URL back to a storage key, if this backend owns it
    fn key_from_url(&self, url: &str) -> Option<String> {
        let prefix = format!("{}/", self.base_url.trim_end_matches('/'));
        url.strip_prefix(&prefix)
            .filter(|key| !key.is_empty())
            .map(String::from)
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl UploadStorage for LocalStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, file: &mut UploadFile) -> StorageResult<()> {
        if let Some(err) = file.error() {
            return Err(StorageError::UploadFailed(err.to_string()));
        }

        let key = file.storage_key();
        let path = self.key_to_path(&key)?;
        let stream = file.take_stream().ok_or_else(|| {
            StorageError::UploadFailed("upload stream already consumed".to_string())
        })?;

        self.ensure_parent_dir(&path).await?;

        // Write to a sibling temp file and promote by rename so a failed
        // save never leaves a retrievable partial object.
        let tmp = {
            let mut os = path.clone().into_os_string();
            os.push(".part");
            PathBuf::from(os)
        };

        let start = std::time::Instant::now();
        let mut reader = StreamReader::new(stream);

        let written: StorageResult<u64> = async {
            let mut out = fs::File::create(&tmp).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to create file {}: {}",
                    tmp.display(),
                    e
                ))
            })?;
            let n = tokio::io::copy(&mut reader, &mut out).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to write stream to file {}: {}",
                    tmp.display(),
                    e
                ))
            })?;
            out.sync_all().await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to sync file {}: {}", tmp.display(), e))
            })?;
            Ok(n)
        }
        .await;

        match written {
            Ok(size_bytes) => {
                fs::rename(&tmp, &path).await.map_err(|e| {
                    StorageError::UploadFailed(format!(
                        "Failed to promote file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                file.set_url(self.url_for(&key));

                tracing::info!(
                    path = %path.display(),
                    key = %key,
                    size_bytes,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage save successful"
                );
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    fn can_remove(&self, url: &str) -> bool {
        self.key_from_url(url).is_some()
    }

    async fn remove(&self, url: &str) -> StorageResult<()> {
        let key = self
            .key_from_url(url)
            .ok_or_else(|| StorageError::NotOwned(url.to_string()))?;
        let path = self.key_to_path(&key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(url.to_string()));
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        tracing::info!(path = %path.display(), key = %key, "Local storage remove successful");
        Ok(())
    }
}
