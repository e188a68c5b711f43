//! Storage registry: backend classes and named instances.
//!
//! Instances are looked up by name during request handling; classes
//! (factories) exist so embedders can register backend types once and
//! instantiate them under several names, or build ad-hoc instances for
//! per-request backend selection. Registration is expected at process
//! start-up, before the pipeline is activated; afterwards the registry is
//! read-mostly.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::traits::{StorageError, StorageResult, UploadStorage};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("storage class '{0}' is already registered")]
    DuplicateClass(String),

    #[error("storage instance '{0}' is already registered")]
    DuplicateInstance(String),

    #[error("storage class '{0}' is not registered")]
    UnknownClass(String),

    #[error("failed to construct storage instance: {0}")]
    Construction(#[from] StorageError),
}

/// Factory for a storage backend class.
///
/// `create` receives the instance name and an opaque JSON config owned by
/// the embedder.
#[async_trait::async_trait]
pub trait StorageFactory: Send + Sync {
    async fn create(
        &self,
        name: &str,
        config: serde_json::Value,
    ) -> StorageResult<Arc<dyn UploadStorage>>;
}

/// Registry mapping backend type names to factories and instance names to
/// ready backends.
///
/// Thread-safe and async-compatible using tokio's RwLock: concurrent
/// requests read instances without blocking each other, while registration
/// is serialized.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    classes: Arc<RwLock<HashMap<String, Arc<dyn StorageFactory>>>>,
    instances: Arc<RwLock<HashMap<String, Arc<dyn UploadStorage>>>>,
}

impl StorageRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend class under a type name. Fails on duplicate type.
    pub async fn register_class(
        &self,
        type_name: impl Into<String>,
        factory: Arc<dyn StorageFactory>,
    ) -> Result<(), RegistryError> {
        let type_name = type_name.into();
        let mut classes = self.classes.write().await;
        if classes.contains_key(&type_name) {
            return Err(RegistryError::DuplicateClass(type_name));
        }
        classes.insert(type_name, factory);
        Ok(())
    }

    /// Register a ready backend instance under its own name.
    pub async fn register_instance(
        &self,
        instance: Arc<dyn UploadStorage>,
    ) -> Result<(), RegistryError> {
        let name = instance.name().to_string();
        let mut instances = self.instances.write().await;
        if instances.contains_key(&name) {
            return Err(RegistryError::DuplicateInstance(name));
        }
        instances.insert(name, instance);
        Ok(())
    }

    /// Instantiate a registered class and cache the instance under `name`.
    pub async fn register_named(
        &self,
        type_name: &str,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let factory = {
            let classes = self.classes.read().await;
            classes
                .get(type_name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownClass(type_name.to_string()))?
        };

        // Registration happens at start-up, so holding the write lock across
        // the factory call keeps duplicate checks race-free.
        let mut instances = self.instances.write().await;
        if instances.contains_key(&name) {
            return Err(RegistryError::DuplicateInstance(name));
        }
        let instance = factory.create(&name, config).await?;
        instances.insert(name, instance);
        Ok(())
    }

    /// Instantiate a registered class and cache it under the type name.
    pub async fn register_anonymous(
        &self,
        type_name: &str,
        config: serde_json::Value,
    ) -> Result<(), RegistryError> {
        self.register_named(type_name, type_name, config).await
    }

    /// Build an ad-hoc, uncached instance from a registered class; used for
    /// per-request dynamic backend selection.
    pub async fn create(
        &self,
        type_name: &str,
        config: serde_json::Value,
    ) -> Result<Arc<dyn UploadStorage>, RegistryError> {
        let factory = {
            let classes = self.classes.read().await;
            classes
                .get(type_name)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownClass(type_name.to_string()))?
        };
        Ok(factory.create(type_name, config).await?)
    }

    /// Look up a registered backend instance by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn UploadStorage>> {
        self.instances.read().await.get(name).cloned()
    }

    /// Check if a backend instance is registered
    pub async fn contains(&self, name: &str) -> bool {
        self.instances.read().await.contains_key(name)
    }

    /// Destroy every registered instance and clear the registry.
    pub async fn teardown(&self) {
        let mut instances = self.instances.write().await;
        for (name, instance) in instances.drain() {
            if let Err(e) = instance.destroy().await {
                tracing::warn!(storage = %name, error = %e, "Storage destroy failed during teardown");
            }
        }
        self.classes.write().await.clear();
    }
}
