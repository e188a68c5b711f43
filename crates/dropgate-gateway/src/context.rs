//! Per-request context handed to hooks, resolvers and processors.

use axum::http::HeaderMap;
use std::collections::HashMap;

/// Request-scoped view of an upload: the matched handler, route and query
/// input, client metadata, and a data map through which hooks communicate
/// with the processing function. One context exists per in-flight request.
pub struct RequestContext {
    handler: String,
    path: String,
    input: HashMap<String, String>,
    client_ip: Option<String>,
    headers: HeaderMap,
    data: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub(crate) fn new(
        handler: impl Into<String>,
        path: impl Into<String>,
        input: HashMap<String, String>,
        client_ip: Option<String>,
        headers: HeaderMap,
    ) -> Self {
        Self {
            handler: handler.into(),
            path: path.into(),
            input,
            client_ip,
            headers,
            data: HashMap::new(),
        }
    }

    /// Name of the matched handler policy.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Request path the policy matched on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Route params merged with query-string pairs.
    pub fn input(&self) -> &HashMap<String, String> {
        &self.input
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.input.get(key).map(String::as_str)
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Attach request-scoped data; read back by later hooks or the
    /// processing function.
    pub fn set_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    pub fn data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_round_trip() {
        let mut ctx = RequestContext::new(
            "asset.upload",
            "/upload",
            HashMap::new(),
            None,
            HeaderMap::new(),
        );

        assert!(ctx.data("tag").is_none());
        ctx.set_data("tag", serde_json::json!("avatar"));
        assert_eq!(ctx.data("tag"), Some(&serde_json::json!("avatar")));
    }

    #[test]
    fn test_params_exposed() {
        let mut input = HashMap::new();
        input.insert("user".to_string(), "42".to_string());

        let ctx = RequestContext::new(
            "asset.upload",
            "/users/42/avatar",
            input,
            Some("10.0.0.1".to_string()),
            HeaderMap::new(),
        );

        assert_eq!(ctx.param("user"), Some("42"));
        assert_eq!(ctx.client_ip(), Some("10.0.0.1"));
        assert_eq!(ctx.handler(), "asset.upload");
    }
}
