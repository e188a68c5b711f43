//! Upload handler policies.
//!
//! A policy is a plain value describing one upload route: the accepted
//! field name, MIME/extension allow-lists, limits, hook chains, the storage
//! resolver and the processing function. Policies are built with a fluent
//! builder and become immutable [`ActivePolicy`] values when activated;
//! admission refuses to activate a policy without a storage resolver and a
//! processing function.

use dropgate_core::{parse_size, PolicyConfig, UploadError, UploadFile, UploadLimits};
use dropgate_storage::UploadStorage;
use futures::future::BoxFuture;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::context::RequestContext;

/// Hook invoked before or after the save; errors short-circuit the chain.
pub type HookFn = Arc<
    dyn for<'a> Fn(
            &'a mut RequestContext,
            &'a mut UploadFile,
        ) -> BoxFuture<'a, Result<(), UploadError>>
        + Send
        + Sync,
>;

/// Caller-supplied processing function; may mutate folder/options and must
/// signal completion or an error.
pub type ProcessFn = HookFn;

/// Storage resolver; invoked once per accepted file.
pub type ResolverFn = Arc<
    dyn for<'a> Fn(
            &'a RequestContext,
            &'a UploadFile,
        ) -> BoxFuture<'a, Result<StorageTarget, UploadError>>
        + Send
        + Sync,
>;

/// Outcome of a policy's storage resolver: a registry name or a ready
/// backend instance.
#[derive(Clone)]
pub enum StorageTarget {
    Name(String),
    Instance(Arc<dyn UploadStorage>),
}

/// Per-policy CORS answer for preflight and upload responses.
#[derive(Clone, Debug, Default)]
pub struct CorsPolicy {
    /// Fixed allowed origin; falls back to the request origin, then `*`.
    pub domain: Option<String>,
    pub credentials: bool,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("upload handler '{0}' does not provide a storage resolver")]
    MissingStorage(String),

    #[error("upload handler '{0}' does not provide an upload processor")]
    MissingProcessor(String),

    #[error("invalid mime pattern '{pattern}' for upload handler '{handler}': {source}")]
    InvalidMimePattern {
        handler: String,
        pattern: String,
        source: regex::Error,
    },
}

/// Builder for one upload route's policy. Mutable until activated.
pub struct UploadPolicy {
    name: String,
    path: String,
    field_name: String,
    mime_patterns: Vec<String>,
    extensions: Vec<String>,
    limits: UploadLimits,
    cors: Option<CorsPolicy>,
    timeout: Option<Duration>,
    storage: Option<ResolverFn>,
    before: Vec<HookFn>,
    after: Vec<HookFn>,
    process: Option<ProcessFn>,
}

impl UploadPolicy {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            field_name: "asset".to_string(),
            mime_patterns: Vec::new(),
            extensions: Vec::new(),
            limits: UploadLimits::default(),
            cors: None,
            timeout: None,
            storage: None,
            before: Vec::new(),
            after: Vec::new(),
            process: None,
        }
    }

    /// Explicitly set the accepted multipart field name.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Accept only MIME types matching this pattern (regex, unanchored).
    pub fn mime_type(mut self, pattern: impl Into<String>) -> Self {
        self.mime_patterns.push(pattern.into());
        self
    }

    /// Accept only this file extension; the leading dot is stripped and the
    /// match is case-insensitive.
    pub fn extension(mut self, ext: impl AsRef<str>) -> Self {
        self.extensions
            .push(ext.as_ref().trim_start_matches('.').to_lowercase());
        self
    }

    pub fn limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the file byte limit from a human size such as `"20MB"`.
    /// Unparseable values are ignored with a warning.
    pub fn max_file_size(mut self, size: impl AsRef<str>) -> Self {
        match parse_size(size.as_ref()) {
            Some(bytes) => self.limits.file_size = bytes,
            None => {
                tracing::warn!(
                    handler = %self.name,
                    size = size.as_ref(),
                    "Ignoring invalid file size limit"
                );
            }
        }
        self
    }

    /// Apply an externally loaded per-route configuration.
    pub fn configure(mut self, config: &PolicyConfig) -> Self {
        if let Some(field_name) = &config.field_name {
            self.field_name = field_name.clone();
        }
        if let Some(limits) = config.limits {
            self.limits = limits;
        }
        for pattern in &config.mime_types {
            self = self.mime_type(pattern.clone());
        }
        for ext in &config.extensions {
            self = self.extension(ext);
        }
        self
    }

    pub fn cors(mut self, cors: CorsPolicy) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Abort uploads that run longer than this in total.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve storage by registry name for every upload.
    pub fn storage_name(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.storage_with(move |_ctx, _file| {
            let name = name.clone();
            Box::pin(async move { Ok(StorageTarget::Name(name)) })
        })
    }

    /// Resolve storage to a fixed backend instance.
    pub fn storage_instance(self, instance: Arc<dyn UploadStorage>) -> Self {
        self.storage_with(move |_ctx, _file| {
            let instance = instance.clone();
            Box::pin(async move { Ok(StorageTarget::Instance(instance)) })
        })
    }

    /// Resolve storage per request; the resolver may be asynchronous and
    /// answer with a name or an instance. The first resolver wins;
    /// subsequent calls are ignored with a warning.
    pub fn storage_with(
        mut self,
        resolver: impl for<'a> Fn(
                &'a RequestContext,
                &'a UploadFile,
            ) -> BoxFuture<'a, Result<StorageTarget, UploadError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        if self.storage.is_some() {
            tracing::warn!(handler = %self.name, "Handler already has a storage resolver");
            return self;
        }
        self.storage = Some(Arc::new(resolver));
        self
    }

    /// Append a hook run after validation and storage resolution, before
    /// the processing function and save. Hooks run in registration order.
    pub fn before_upload(
        mut self,
        hook: impl for<'a> Fn(
                &'a mut RequestContext,
                &'a mut UploadFile,
            ) -> BoxFuture<'a, Result<(), UploadError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.before.push(Arc::new(hook));
        self
    }

    /// Append a hook run after a successful save, in registration order.
    pub fn after_upload(
        mut self,
        hook: impl for<'a> Fn(
                &'a mut RequestContext,
                &'a mut UploadFile,
            ) -> BoxFuture<'a, Result<(), UploadError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.after.push(Arc::new(hook));
        self
    }

    /// Set the upload processing function. The first registration wins;
    /// subsequent calls are ignored with a warning.
    pub fn process(
        mut self,
        processor: impl for<'a> Fn(
                &'a mut RequestContext,
                &'a mut UploadFile,
            ) -> BoxFuture<'a, Result<(), UploadError>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        if self.process.is_some() {
            tracing::warn!(handler = %self.name, "Handler already registered an upload processor");
            return self;
        }
        self.process = Some(Arc::new(processor));
        self
    }

    /// Validate and freeze the policy. Refused without exactly one storage
    /// resolver and one processing function.
    pub fn activate(self) -> Result<ActivePolicy, PolicyError> {
        let storage = self
            .storage
            .ok_or_else(|| PolicyError::MissingStorage(self.name.clone()))?;
        let process = self
            .process
            .ok_or_else(|| PolicyError::MissingProcessor(self.name.clone()))?;

        let mut mime_types = Vec::with_capacity(self.mime_patterns.len());
        for pattern in &self.mime_patterns {
            let compiled = Regex::new(pattern).map_err(|source| PolicyError::InvalidMimePattern {
                handler: self.name.clone(),
                pattern: pattern.clone(),
                source,
            })?;
            mime_types.push(compiled);
        }

        Ok(ActivePolicy {
            name: self.name,
            path: self.path,
            field_name: self.field_name,
            mime_types,
            extensions: self.extensions,
            limits: self.limits,
            cors: self.cors,
            timeout: self.timeout,
            storage,
            before: self.before,
            after: self.after,
            process,
        })
    }
}

/// An activated, immutable policy; what the admission gate routes on.
pub struct ActivePolicy {
    name: String,
    path: String,
    field_name: String,
    mime_types: Vec<Regex>,
    extensions: Vec<String>,
    limits: UploadLimits,
    cors: Option<CorsPolicy>,
    timeout: Option<Duration>,
    storage: ResolverFn,
    before: Vec<HookFn>,
    after: Vec<HookFn>,
    process: ProcessFn,
}

impl ActivePolicy {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn cors(&self) -> Option<&CorsPolicy> {
        self.cors.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn storage(&self) -> &ResolverFn {
        &self.storage
    }

    pub(crate) fn before_hooks(&self) -> &[HookFn] {
        &self.before
    }

    pub(crate) fn after_hooks(&self) -> &[HookFn] {
        &self.after
    }

    pub(crate) fn processor(&self) -> &ProcessFn {
        &self.process
    }

    /// True iff the entity passes both allow-lists: (no MIME patterns OR
    /// any pattern matches) AND (no extensions OR a case-insensitive
    /// member). An entity failing this never reaches storage resolution.
    pub fn is_file_valid(&self, file: &UploadFile) -> bool {
        let mime_valid = self.mime_types.is_empty()
            || self
                .mime_types
                .iter()
                .any(|pattern| pattern.is_match(file.mime_type()));
        let ext_valid = self.extensions.is_empty()
            || self
                .extensions
                .iter()
                .any(|ext| ext.eq_ignore_ascii_case(file.extension()));
        mime_valid && ext_valid
    }
}
