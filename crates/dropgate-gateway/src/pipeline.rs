//! Multipart upload pipeline.
//!
//! Drives field-by-field parsing of a multipart body under a policy's
//! limits, produces at most one upload entity per request, and routes it
//! through validation, storage resolution, the before-hook chain, the
//! processing function, the backend save and the after-hook chain. The
//! pipeline owns the entity and the in-flight part end-to-end: every exit
//! path drains the remainder of the current part, destroys the entity
//! exactly once, and resolves to a single error or success envelope
//! (first error wins).

use axum::extract::multipart::{Field, Multipart, MultipartError};
use bytes::Bytes;
use dropgate_core::{ByteStream, SuccessEnvelope, UploadError, UploadFile, UploadLimits};
use dropgate_storage::{StorageRegistry, UploadStorage};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::context::RequestContext;
use crate::policy::{ActivePolicy, StorageTarget};

/// Chunks in flight between the parser and the storage backend. Bounded so
/// transport back-pressure reaches the client instead of buffering the file.
const CHUNK_CHANNEL_DEPTH: usize = 16;

/// Run the pipeline for one matched request.
///
/// The entity, if one was created, is destroyed before this returns: on
/// success, on every abort, and on timeout.
pub(crate) async fn run(
    policy: &ActivePolicy,
    registry: &StorageRegistry,
    ctx: &mut RequestContext,
    multipart: Multipart,
    limits: UploadLimits,
) -> Result<SuccessEnvelope, UploadError> {
    let mut entity: Option<UploadFile> = None;

    let result = match policy.timeout() {
        Some(timeout) => {
            match tokio::time::timeout(
                timeout,
                drive(policy, registry, ctx, multipart, &limits, &mut entity),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(UploadError::Timeout),
            }
        }
        None => drive(policy, registry, ctx, multipart, &limits, &mut entity).await,
    };

    if let Some(mut file) = entity.take() {
        file.destroy();
    }

    match &result {
        Ok(envelope) => {
            tracing::info!(
                handler = policy.name(),
                url = envelope.url.as_deref().unwrap_or(""),
                size_bytes = envelope.size.unwrap_or(0),
                "Upload completed"
            );
        }
        Err(err) => log_abort(policy.name(), err),
    }
    result
}

fn log_abort(handler: &str, err: &UploadError) {
    use dropgate_core::LogLevel;
    match err.log_level() {
        LogLevel::Debug => {
            tracing::debug!(handler, error = %err, code = err.error_code(), "Upload aborted")
        }
        LogLevel::Warn => {
            tracing::warn!(handler, error = %err, code = err.error_code(), "Upload aborted")
        }
        LogLevel::Error => {
            tracing::error!(handler, error = %err, code = err.error_code(), "Upload aborted")
        }
    }
}

async fn drive(
    policy: &ActivePolicy,
    registry: &StorageRegistry,
    ctx: &mut RequestContext,
    mut multipart: Multipart,
    limits: &UploadLimits,
    entity: &mut Option<UploadFile>,
) -> Result<SuccessEnvelope, UploadError> {
    let mut parts: u32 = 0;
    let mut fields: u32 = 0;
    let mut files: u32 = 0;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        parts += 1;
        if parts > limits.parts {
            drain_field(&mut field).await;
            return Err(UploadError::PartsLimit);
        }
        if field.headers().len() > limits.header_pairs {
            drain_field(&mut field).await;
            return Err(UploadError::PartsLimit);
        }

        // Non-file fields are tolerated up to the configured limits; their
        // values are drained and discarded without buffering.
        if field.file_name().is_none() {
            fields += 1;
            if fields > limits.fields {
                drain_field(&mut field).await;
                return Err(UploadError::FieldsLimit);
            }
            if field.name().map(str::len).unwrap_or(0) > limits.field_name_size {
                drain_field(&mut field).await;
                return Err(UploadError::FieldsLimit);
            }
            discard_value(&mut field, limits.field_size).await?;
            continue;
        }

        // File part: only the configured field name is accepted, and only
        // one file per request is processed.
        if field.name() != Some(policy.field_name()) {
            drain_field(&mut field).await;
            return Err(UploadError::InvalidField);
        }
        files += 1;
        if entity.is_some() || files > limits.files {
            drain_field(&mut field).await;
            return Err(UploadError::FileLimit);
        }

        let file_name = field.file_name().unwrap_or("file").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let encoding = field
            .headers()
            .get("content-transfer-encoding")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("7bit")
            .to_string();

        let (tx, stream) = chunk_channel();
        let file = entity.insert(UploadFile::new(stream, file_name, mime_type, encoding));

        if !policy.is_file_valid(file) {
            drain_field(&mut field).await;
            return Err(UploadError::file_invalid());
        }

        process_file(policy, registry, ctx, &mut field, file, tx, limits).await?;
    }

    match entity.as_ref() {
        Some(file) => Ok(file.to_envelope()),
        None => Err(UploadError::missing_file()),
    }
}

/// Validation passed: resolve storage, run the before chain and the
/// processing function, then stream the part into the backend and run the
/// after chain. Every early exit drains the part first.
async fn process_file(
    policy: &ActivePolicy,
    registry: &StorageRegistry,
    ctx: &mut RequestContext,
    field: &mut Field<'_>,
    file: &mut UploadFile,
    tx: mpsc::Sender<io::Result<Bytes>>,
    limits: &UploadLimits,
) -> Result<(), UploadError> {
    let storage = match resolve_storage(policy, registry, ctx, file).await {
        Ok(storage) => storage,
        Err(err) => {
            drain_field(field).await;
            return Err(err);
        }
    };

    for hook in policy.before_hooks() {
        if let Err(err) = hook(ctx, file).await {
            drain_field(field).await;
            return Err(err);
        }
    }

    if let Err(err) = (policy.processor())(ctx, file).await {
        drain_field(field).await;
        return Err(err);
    }

    // Pump and save run concurrently: the backend reads the entity's stream
    // while the pump feeds it from the transport, watching the byte limit.
    let (pump_outcome, save_result) =
        tokio::join!(pump_part(field, tx, limits.file_size), storage.save(file));

    match pump_outcome {
        PumpOutcome::TooLarge => {
            file.mark_too_large(None);
            return Err(UploadError::FileTooLarge);
        }
        PumpOutcome::TransportFailed => return Err(UploadError::ContentType),
        PumpOutcome::Complete => {}
    }

    save_result.map_err(|e| UploadError::Storage(e.to_string()))?;

    // After-hooks run only on a successful save. A failing after-hook is
    // reported; the stored object is not rolled back.
    for hook in policy.after_hooks() {
        hook(ctx, file).await?;
    }
    Ok(())
}

async fn resolve_storage(
    policy: &ActivePolicy,
    registry: &StorageRegistry,
    ctx: &RequestContext,
    file: &UploadFile,
) -> Result<Arc<dyn UploadStorage>, UploadError> {
    let target = (policy.storage())(ctx, file).await.map_err(|err| {
        tracing::warn!(handler = policy.name(), error = %err, "Storage resolver failed");
        UploadError::StorageUnavailable
    })?;

    match target {
        StorageTarget::Instance(storage) => Ok(storage),
        StorageTarget::Name(name) => registry.get(&name).await.ok_or_else(|| {
            tracing::warn!(
                handler = policy.name(),
                storage = %name,
                "Resolved storage is not registered"
            );
            UploadError::StorageUnavailable
        }),
    }
}

enum PumpOutcome {
    Complete,
    TooLarge,
    TransportFailed,
}

/// Forward the part's chunks into the entity's stream, enforcing the byte
/// limit mid-flight.
///
/// On overflow the entity stream is poisoned with an error and the rest of
/// the part is drained so the transport is never left backed up. If the
/// receiving side goes away early the remaining bytes are likewise
/// discarded; the save result tells that story.
async fn pump_part(
    field: &mut Field<'_>,
    tx: mpsc::Sender<io::Result<Bytes>>,
    max_bytes: u64,
) -> PumpOutcome {
    let mut received: u64 = 0;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                received += chunk.len() as u64;
                if received > max_bytes {
                    let _ = tx
                        .send(Err(io::Error::other("file size limit exceeded")))
                        .await;
                    drop(tx);
                    drain_field(field).await;
                    return PumpOutcome::TooLarge;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    drain_field(field).await;
                    return PumpOutcome::Complete;
                }
            }
            Ok(None) => return PumpOutcome::Complete,
            Err(err) => {
                tracing::warn!(error = %err, "Multipart transport failed mid-part");
                let _ = tx.send(Err(io::Error::other(err.to_string()))).await;
                return PumpOutcome::TransportFailed;
            }
        }
    }
}

/// The bounded channel backing an entity's owned stream.
fn chunk_channel() -> (mpsc::Sender<io::Result<Bytes>>, ByteStream) {
    let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(CHUNK_CHANNEL_DEPTH);
    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (tx, Box::pin(stream))
}

/// Drain and discard the remainder of a part.
async fn drain_field(field: &mut Field<'_>) {
    while let Ok(Some(_)) = field.chunk().await {}
}

/// Drain a non-file field's value, enforcing the value size limit.
async fn discard_value(field: &mut Field<'_>, max_bytes: u64) -> Result<(), UploadError> {
    let mut total: u64 = 0;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        total += chunk.len() as u64;
        if total > max_bytes {
            drain_field(field).await;
            return Err(UploadError::FieldsLimit);
        }
    }
    Ok(())
}

fn malformed(err: MultipartError) -> UploadError {
    tracing::debug!(error = %err, "Malformed multipart payload");
    UploadError::ContentType
}
