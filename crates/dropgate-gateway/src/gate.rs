//! Admission gate
//!
//! The gate is a root middleware. It matches the request path against the
//! registered upload routes in registration order, answers `OPTIONS`
//! preflight, claims matching multipart `POST`s for the pipeline, and
//! passes everything else through untouched to the next collaborator.

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Json, Router,
};
use dropgate_core::{LimitOverrides, UploadError};
use dropgate_storage::StorageRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::context::RequestContext;
use crate::error::HttpUploadError;
use crate::pipeline;
use crate::policy::{ActivePolicy, PolicyError, UploadPolicy};

enum Segment {
    Literal(String),
    Param(String),
}

/// Route pattern with `:param` segments.
struct RoutePattern {
    segments: Vec<Segment>,
}

impl RoutePattern {
    fn parse(path: &str) -> Self {
        let segments = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(params)
    }
}

struct RouteEntry {
    path: String,
    pattern: RoutePattern,
    policy: Arc<ActivePolicy>,
}

/// The upload gateway: an explicit storage registry plus the activated
/// routes. Constructed once at start-up and shared behind an `Arc`.
pub struct UploadGateway {
    registry: Arc<StorageRegistry>,
    routes: RwLock<Vec<RouteEntry>>,
}

impl UploadGateway {
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Self {
            registry,
            routes: RwLock::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Activate a policy and register its route. First matching route in
    /// registration order wins.
    pub fn add(&self, policy: UploadPolicy) -> Result<(), PolicyError> {
        let active = policy.activate()?;
        tracing::info!(handler = active.name(), path = active.path(), "Upload route registered");
        let entry = RouteEntry {
            path: active.path().to_string(),
            pattern: RoutePattern::parse(active.path()),
            policy: Arc::new(active),
        };
        self.routes
            .write()
            .expect("upload route table poisoned")
            .push(entry);
        Ok(())
    }

    /// Remove a registered route by its path. Returns whether a route was
    /// removed.
    pub fn remove(&self, path: &str) -> bool {
        let mut routes = self.routes.write().expect("upload route table poisoned");
        let before = routes.len();
        routes.retain(|entry| entry.path != path);
        routes.len() != before
    }

    fn match_path(&self, path: &str) -> Option<(Arc<ActivePolicy>, HashMap<String, String>)> {
        let routes = self.routes.read().expect("upload route table poisoned");
        routes.iter().find_map(|entry| {
            entry
                .pattern
                .matches(path)
                .map(|params| (entry.policy.clone(), params))
        })
    }
}

/// Build a router with the gateway middleware wrapped around a pass-through
/// fallback.
///
/// Embedders with their own router should layer [`gateway_middleware`]
/// themselves and disable axum's default body limit on upload paths: the
/// pipeline enforces the policy's limits mid-stream and must see the whole
/// body.
pub fn router(gateway: Arc<UploadGateway>) -> Router {
    Router::new()
        .fallback(|| async { StatusCode::NOT_FOUND })
        .layer(middleware::from_fn_with_state(gateway, gateway_middleware))
        .layer(DefaultBodyLimit::disable())
}

/// Root middleware claiming upload requests for the pipeline.
pub async fn gateway_middleware(
    State(gateway): State<Arc<UploadGateway>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let Some((policy, params)) = gateway.match_path(&path) else {
        return next.run(request).await;
    };

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(&policy, request.headers(), response.headers_mut());
        return response;
    }
    if request.method() != Method::POST {
        return next.run(request).await;
    }
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);
    if !is_multipart {
        return next.run(request).await;
    }

    // Per-request limit overrides installed by upstream middleware.
    let limits = match request.extensions().get::<LimitOverrides>() {
        Some(overrides) => policy.limits().merged(overrides),
        None => *policy.limits(),
    };

    let request_headers = request.headers().clone();

    // Content-Length pre-check: reject oversize bodies before any parsing.
    // The mid-stream watcher stays authoritative for chunked or lying
    // clients.
    if let Some(length) = content_length(&request_headers) {
        if length > limits.file_size {
            let mut response = HttpUploadError(UploadError::FileTooLarge).into_response();
            apply_cors(&policy, &request_headers, response.headers_mut());
            return response;
        }
    }

    let mut input = params;
    parse_query(request.uri().query(), &mut input);
    let client_ip = client_ip(&request_headers);

    let multipart = match axum::extract::Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(err) => {
            tracing::debug!(error = %err, "Failed to start multipart parsing");
            let mut response = HttpUploadError(UploadError::ContentType).into_response();
            apply_cors(&policy, &request_headers, response.headers_mut());
            return response;
        }
    };

    let mut ctx = RequestContext::new(
        policy.name(),
        &path,
        input,
        client_ip,
        request_headers.clone(),
    );

    let result = pipeline::run(&policy, gateway.registry(), &mut ctx, multipart, limits).await;

    let mut response = match result {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => HttpUploadError(err).into_response(),
    };
    apply_cors(&policy, &request_headers, response.headers_mut());
    response
}

fn apply_cors(policy: &ActivePolicy, request_headers: &HeaderMap, headers: &mut HeaderMap) {
    let Some(cors) = policy.cors() else { return };

    let origin = cors
        .domain
        .clone()
        .or_else(|| {
            request_headers
                .get(header::ORIGIN)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .unwrap_or_else(|| "*".to_string());

    if let Ok(value) = HeaderValue::from_str(&origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static(if cors.credentials { "true" } else { "false" }),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
}

/// Merge query-string pairs into the input map; route params win on key
/// collisions.
fn parse_query(query: Option<&str>, input: &mut HashMap<String, String>) {
    let Some(query) = query else { return };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        input
            .entry(decode(key))
            .or_insert_with(|| decode(value));
    }
}

fn decode(component: &str) -> String {
    percent_encoding::percent_decode_str(component)
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| component.to_string())
}
