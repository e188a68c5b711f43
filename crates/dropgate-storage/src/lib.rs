//! Dropgate Storage Library
//!
//! This crate provides the storage abstraction for dropgate: the
//! `UploadStorage` trait every backend implements, a registry that maps
//! backend names to instances and backend types to factories, and the
//! built-in local-filesystem and in-memory backends.
//!
//! # Storage key format
//!
//! Keys are produced by the upload entity (`folder/{derived key}`), must not
//! contain `..` or a leading `/`, and are mapped to backend locations
//! verbatim so all backends stay consistent.

pub mod local;
pub mod memory;
pub mod registry;
pub mod traits;

// Re-export commonly used types
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use registry::{RegistryError, StorageFactory, StorageRegistry};
pub use traits::{StorageError, StorageResult, UploadStorage};
