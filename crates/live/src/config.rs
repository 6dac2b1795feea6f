//! Live core configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STALLSIDE_API_BASE_URL` - Base URL of the hosted marketplace API
//! - `STALLSIDE_SOCKET_URL` - WebSocket endpoint for the realtime channel
//! - `STALLSIDE_AUTH_TOKEN` - Bearer token issued by the auth backend
//!
//! ## Optional
//! - `STALLSIDE_PRESENCE_TIMEOUT_SECS` - Presence snapshot wait (default: 10)

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

const DEFAULT_PRESENCE_TIMEOUT_SECS: u64 = 10;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Live core configuration.
///
/// Implements `Debug` manually to redact the auth token.
#[derive(Clone)]
pub struct LiveConfig {
    /// Base URL of the hosted marketplace API.
    pub api_base_url: Url,
    /// WebSocket endpoint for the realtime channel.
    pub socket_url: Url,
    /// Bearer token for the hosted API, issued by the auth backend.
    pub auth_token: SecretString,
    /// How long to wait for the initial presence snapshot before the UI
    /// proceeds treating presence as unknown.
    pub presence_timeout: Duration,
}

impl std::fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveConfig")
            .field("api_base_url", &self.api_base_url.as_str())
            .field("socket_url", &self.socket_url.as_str())
            .field("auth_token", &"[REDACTED]")
            .field("presence_timeout", &self.presence_timeout)
            .finish()
    }
}

impl LiveConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = get_url("STALLSIDE_API_BASE_URL")?;
        let socket_url = get_url("STALLSIDE_SOCKET_URL")?;
        let auth_token = get_required_secret("STALLSIDE_AUTH_TOKEN")?;

        let presence_timeout_secs = match std::env::var("STALLSIDE_PRESENCE_TIMEOUT_SECS") {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidEnvVar(
                    "STALLSIDE_PRESENCE_TIMEOUT_SECS".to_string(),
                    e.to_string(),
                )
            })?,
            Err(_) => DEFAULT_PRESENCE_TIMEOUT_SECS,
        };

        Ok(Self {
            api_base_url,
            socket_url,
            auth_token,
            presence_timeout: Duration::from_secs(presence_timeout_secs),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get a required environment variable parsed as a URL.
fn get_url(key: &str) -> Result<Url, ConfigError> {
    let raw = get_required_env(key)?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}
