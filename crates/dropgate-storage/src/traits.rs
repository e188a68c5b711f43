//! Storage abstraction trait
//!
//! This module defines the trait that all storage backends must implement.

use async_trait::async_trait;
use dropgate_core::UploadFile;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not owned by this storage: {0}")]
    NotOwned(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// All storage backends (local filesystem, in-memory, object stores
/// registered by embedders) must implement this trait. The pipeline works
/// with any backend without coupling to implementation details.
#[async_trait]
pub trait UploadStorage: Send + Sync {
    /// Instance name used for registry lookups.
    fn name(&self) -> &str;

    /// Consume the entity's owned stream and persist the object.
    ///
    /// On success the backend sets the public URL on the entity; the final
    /// size is the entity's byte count once the stream is drained. A failed
    /// save must leave no retrievable partial object, and must not be
    /// retried by the caller. An entity carrying a terminal error fails
    /// immediately with that error.
    async fn save(&self, file: &mut UploadFile) -> StorageResult<()>;

    /// Whether `url` points at an object owned by this backend.
    ///
    /// Pure predicate; callers use it to determine ownership before
    /// invoking [`UploadStorage::remove`].
    fn can_remove(&self, url: &str) -> bool;

    /// Delete a previously saved object by its public URL.
    ///
    /// Fails with [`StorageError::NotOwned`] where `can_remove` would have
    /// answered false, and [`StorageError::NotFound`] when the object does
    /// not exist.
    async fn remove(&self, url: &str) -> StorageResult<()>;

    /// Release backend-held resources. Idempotent.
    async fn destroy(&self) -> StorageResult<()> {
        Ok(())
    }
}
