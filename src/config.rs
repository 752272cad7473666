use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::gemini::DEFAULT_BASE_URL;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TOTAL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Settings for the Gemini estimator.
#[derive(Clone)]
pub struct EstimatorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Overrides the built-in model preference list when set.
    pub preferred_models: Option<Vec<String>>,
    /// Applied to each HTTP call.
    pub request_timeout: Duration,
    /// Applied to a whole estimation, across every candidate and retry.
    pub total_timeout: Duration,
}

impl std::fmt::Debug for EstimatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstimatorConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("preferred_models", &self.preferred_models)
            .field("request_timeout", &self.request_timeout)
            .field("total_timeout", &self.total_timeout)
            .finish()
    }
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            preferred_models: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            total_timeout: Duration::from_secs(DEFAULT_TOTAL_TIMEOUT_SECS),
        }
    }
}

impl EstimatorConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: normalize_key(Some(api_key.into())),
            ..Self::default()
        }
    }

    /// Reads `GEMINI_*` variables; `.env` should already be loaded.
    pub fn from_env() -> Self {
        Self {
            api_key: normalize_key(env::var("GEMINI_API_KEY").ok()),
            base_url: env::var("GEMINI_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            preferred_models: env::var("GEMINI_PREFERRED_MODELS")
                .ok()
                .map(|v| parse_model_list(&v))
                .filter(|models| !models.is_empty()),
            request_timeout: Duration::from_secs(env_or(
                "GEMINI_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            total_timeout: Duration::from_secs(env_or(
                "GEMINI_TOTAL_TIMEOUT_SECS",
                DEFAULT_TOTAL_TIMEOUT_SECS,
            )),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Settings for the HTTP surface.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_image_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            max_image_bytes: env_or("MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES),
        }
    }
}

fn normalize_key(key: Option<String>) -> Option<String> {
    key.map(|k| k.trim().to_string()).filter(|k| !k.is_empty())
}

fn parse_model_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or<T: FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("⚠️ {}={:?} is not valid, using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
