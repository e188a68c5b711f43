//! Configuration module
//!
//! Environment-backed configuration for the gateway binary (server port,
//! process-wide default limits, the built-in local storage backend) and the
//! per-route policy configuration shape consumed from an external loader.

use serde::{Deserialize, Serialize};
use std::env;

use crate::limits::{parse_size, UploadLimits};

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_UPLOAD_PATH: &str = "/upload";
const DEFAULT_FIELD_NAME: &str = "asset";

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub upload_path: String,
    pub upload_field_name: String,
    pub default_limits: UploadLimits,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let mut default_limits = UploadLimits::default();
        if let Some(size) = env_size("UPLOAD_MAX_FILE_SIZE") {
            default_limits.file_size = size;
        }
        if let Some(size) = env_size("UPLOAD_MAX_FIELD_SIZE") {
            default_limits.field_size = size;
        }
        if let Ok(count) = env::var("UPLOAD_MAX_HEADER_PAIRS") {
            default_limits.header_pairs = count
                .parse()
                .map_err(|_| anyhow::anyhow!("UPLOAD_MAX_HEADER_PAIRS must be a number"))?;
        }

        Ok(Config {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            upload_path: env::var("UPLOAD_PATH").unwrap_or_else(|_| DEFAULT_UPLOAD_PATH.to_string()),
            upload_field_name: env::var("UPLOAD_FIELD_NAME")
                .unwrap_or_else(|_| DEFAULT_FIELD_NAME.to_string()),
            default_limits,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

/// Per-route policy configuration, consumed from an external loader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub field_name: Option<String>,
    pub limits: Option<UploadLimits>,
    pub mime_types: Vec<String>,
    pub extensions: Vec<String>,
}

fn env_size(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|raw| {
        let parsed = parse_size(&raw);
        if parsed.is_none() {
            tracing::warn!(var = key, value = %raw, "Ignoring unparseable size variable");
        }
        parsed
    })
}
