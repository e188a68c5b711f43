//! The upload entity: one logical file per request.
//!
//! An `UploadFile` owns the byte stream of the part it was created from
//! until a storage backend consumes it via [`UploadFile::take_stream`] or
//! [`UploadFile::destroy`] releases it. Its size counter grows as the owned
//! stream is read and freezes once the stream ends.

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::UploadError;
use crate::stream::{ByteCounter, ByteStream, CountingStream};

/// Success envelope derived from a stored entity: `{url, size?}`.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// The logical file being uploaded.
pub struct UploadFile {
    name: String,
    key: String,
    extension: String,
    mime_type: String,
    encoding: String,
    folder: Option<String>,
    options: Option<serde_json::Map<String, serde_json::Value>>,
    url: Option<String>,
    error: Option<UploadError>,
    counter: ByteCounter,
    stream: Option<ByteStream>,
}

impl UploadFile {
    /// Create an entity from a part's byte stream and headers.
    ///
    /// The source is wrapped with a counting adapter so `size()` reflects
    /// every byte the eventual consumer reads. Construction never blocks on
    /// stream completion.
    pub fn new(
        source: ByteStream,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        encoding: impl Into<String>,
    ) -> Self {
        let name = {
            let n = name.into();
            if n.is_empty() {
                "file".to_string()
            } else {
                n
            }
        };
        let mime_type = mime_type.into();
        let extension = extension_of(&name);
        let key = derive_key(&name, &extension, &mime_type);
        let counter = ByteCounter::new();
        let stream: ByteStream = Box::pin(CountingStream::new(source, counter.clone()));

        Self {
            name,
            key,
            extension,
            mime_type,
            encoding: encoding.into(),
            folder: None,
            options: None,
            url: None,
            error: None,
            counter,
            stream: Some(stream),
        }
    }

    /// Create an entity from an in-memory buffer; the size is known upfront.
    pub fn from_bytes(
        data: impl Into<Bytes>,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        encoding: impl Into<String>,
    ) -> Self {
        let data = data.into();
        let mime_type = {
            let m = mime_type.into();
            if m.is_empty() {
                "text/plain".to_string()
            } else {
                m
            }
        };
        let encoding = {
            let e = encoding.into();
            if e.is_empty() {
                "utf8".to_string()
            } else {
                e
            }
        };

        let mut file = Self::new(
            Box::pin(futures::stream::empty()),
            name,
            mime_type,
            encoding,
        );
        file.counter.set(data.len() as u64);
        file.stream = Some(Box::pin(futures::stream::iter([Ok::<_, std::io::Error>(
            data,
        )])));
        file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base storage key, unique per entity.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Lower-cased extension without the leading dot; empty when absent.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    /// Bytes observed on the owned stream so far; final once the stream ends.
    pub fn size(&self) -> u64 {
        self.counter.get()
    }

    pub fn folder(&self) -> Option<&str> {
        self.folder.as_deref()
    }

    pub fn options(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.options.as_ref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn error(&self) -> Option<&UploadError> {
        self.error.as_ref()
    }

    /// Set the folder hierarchy of the file. Must happen before `save` is
    /// dispatched; the pipeline never mutates after dispatch.
    pub fn set_folder(&mut self, folder: &str) {
        let normalized = squeeze_slashes(folder.trim_start_matches('/'));
        self.folder = Some(normalized);
    }

    /// Attach opaque options read only by the storage backend.
    pub fn set_options(&mut self, options: serde_json::Map<String, serde_json::Value>) {
        self.options = Some(options);
    }

    /// Record the public location; called by the storage backend on save.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    /// Override the observed size; for backends that learn the final size
    /// out of band.
    pub fn set_size(&mut self, size: u64) {
        self.counter.set(size);
    }

    /// Mark the file as too large; any later save attempt fails with the
    /// same error and must not be retried.
    pub fn mark_too_large(&mut self, cause: Option<UploadError>) {
        self.error = Some(cause.unwrap_or(UploadError::FileTooLarge));
    }

    /// Fully-qualified storage key: `folder` + `/` + `key`, normalized.
    /// Computed on demand so late folder changes are reflected.
    pub fn storage_key(&self) -> String {
        match &self.folder {
            Some(folder) if !folder.is_empty() => {
                squeeze_slashes(&format!("{}/{}", folder, self.key))
            }
            _ => self.key.clone(),
        }
    }

    /// Hand the owned stream to the consumer; the entity keeps counting the
    /// bytes the consumer reads. Returns `None` once consumed or destroyed.
    pub fn take_stream(&mut self) -> Option<ByteStream> {
        self.stream.take()
    }

    /// Success envelope for this entity; `size` is omitted while zero.
    pub fn to_envelope(&self) -> SuccessEnvelope {
        SuccessEnvelope {
            url: self.url.clone(),
            size: match self.size() {
                0 => None,
                n => Some(n),
            },
        }
    }

    /// Release the owned stream and clear all fields. Idempotent; callable
    /// from any state. The orchestrating pipeline calls this exactly once
    /// per entity regardless of outcome.
    pub fn destroy(&mut self) {
        self.stream = None;
        self.options = None;
        self.folder = None;
        self.url = None;
        self.error = None;
        self.name.clear();
        self.key.clear();
        self.extension.clear();
        self.mime_type.clear();
        self.encoding.clear();
        self.counter.set(0);
    }
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .field("folder", &self.folder)
            .field("has_stream", &self.stream.is_some())
            .finish()
    }
}

fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

fn squeeze_slashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_slash = false;
    for c in input.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Derive a collision-resistant storage key: millisecond timestamp, sha256
/// over a random salt plus the part headers, the salt itself, and the
/// original name when meaningful.
fn derive_key(name: &str, extension: &str, mime_type: &str) -> String {
    use rand::Rng;

    let now = Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let salt_bytes: [u8; 4] = rng.random();
    let salt = hex::encode(salt_bytes);

    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(now.to_string().as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(mime_type.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let mut key = format!("{}_{}{}", now, digest, salt);
    if name != "file" {
        key.push('/');
        key.push_str(name);
    }
    if !extension.is_empty() && !key.ends_with(&format!(".{}", extension)) {
        key.push('.');
        key.push_str(extension);
    }
    squeeze_slashes(&key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn stream_of(data: &[u8]) -> ByteStream {
        Box::pin(futures::stream::iter([Ok::<_, std::io::Error>(
            Bytes::copy_from_slice(data),
        )]))
    }

    fn test_file(name: &str) -> UploadFile {
        UploadFile::new(stream_of(b"payload"), name, "image/jpeg", "7bit")
    }

    #[test]
    fn test_keys_are_distinct() {
        let a = test_file("photo.jpg");
        let b = test_file("photo.jpg");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_extension_lowercased_without_dot() {
        let file = test_file("PHOTO.JPG");
        assert_eq!(file.extension(), "jpg");
    }

    #[test]
    fn test_key_carries_name_and_extension() {
        let file = test_file("photo.jpg");
        assert!(file.key().contains("/photo.jpg"));
        assert!(file.key().ends_with(".jpg"));
    }

    #[test]
    fn test_anonymous_name_key_has_no_name_segment() {
        let file = UploadFile::new(stream_of(b""), "", "text/plain", "7bit");
        assert_eq!(file.name(), "file");
        assert!(!file.key().contains('/'));
    }

    #[test]
    fn test_folder_normalization() {
        let mut file = test_file("photo.jpg");
        file.set_folder("/albums//2026/");
        assert_eq!(file.folder(), Some("albums/2026/"));
        assert!(file.storage_key().starts_with("albums/2026/"));
        assert!(!file.storage_key().contains("//"));
    }

    #[test]
    fn test_storage_key_reflects_late_folder_change() {
        let mut file = test_file("photo.jpg");
        let bare = file.storage_key();
        file.set_folder("users/42");
        assert_eq!(file.storage_key(), format!("users/42/{}", bare));
    }

    #[test]
    fn test_mark_too_large_sets_error() {
        let mut file = test_file("photo.jpg");
        assert!(file.error().is_none());
        file.mark_too_large(None);
        assert_eq!(file.error(), Some(&UploadError::FileTooLarge));
    }

    #[test]
    fn test_from_bytes_presets_size() {
        let file = UploadFile::from_bytes(&b"hello world"[..], "note.txt", "", "");
        assert_eq!(file.size(), 11);
        assert_eq!(file.mime_type(), "text/plain");
        assert_eq!(file.encoding(), "utf8");
    }

    #[tokio::test]
    async fn test_stream_consumption_updates_size() {
        let mut file = test_file("photo.jpg");
        assert_eq!(file.size(), 0);

        let mut stream = file.take_stream().unwrap();
        while stream.next().await.is_some() {}

        assert_eq!(file.size(), 7);
        assert!(file.take_stream().is_none());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut file = test_file("photo.jpg");
        file.set_folder("x");
        file.set_url("http://example.com/x");

        file.destroy();
        assert!(file.take_stream().is_none());
        assert_eq!(file.name(), "");
        assert_eq!(file.key(), "");
        assert_eq!(file.folder(), None);
        assert_eq!(file.url(), None);
        assert_eq!(file.size(), 0);

        // Second destroy is a no-op and leaves the same empty state.
        file.destroy();
        assert_eq!(file.name(), "");
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn test_envelope_omits_zero_size() {
        let file = test_file("photo.jpg");
        let json = serde_json::to_value(file.to_envelope()).unwrap();
        assert!(json.get("size").is_none());

        let stored = UploadFile::from_bytes(&b"data"[..], "d.bin", "application/octet-stream", "");
        let json = serde_json::to_value(stored.to_envelope()).unwrap();
        assert_eq!(json.get("size").and_then(|v| v.as_u64()), Some(4));
    }
}
