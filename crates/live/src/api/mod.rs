//! HTTP clients for the hosted marketplace API.
//!
//! Every endpoint answers with a JSON envelope
//! `{"success": bool, "data": ..., "error": {"code", "message"}}`. The
//! shared [`ApiClient`] owns the connection pool, base URL and bearer
//! token, and maps envelope and HTTP failures onto [`AppError`].

pub mod messages;
pub mod orders;
pub mod upload;

pub use messages::{HttpMessageApi, MessageApi, MessagePage};
pub use orders::{HttpOrderApi, OrderApi, OrderDraft, OrderFilter};
pub use upload::{HttpProofUploader, ProofUploader};

use std::sync::Arc;

use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::error;
use url::Url;

use crate::config::LiveConfig;
use crate::error::AppError;

/// Shared HTTP client for the hosted marketplace API.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    http: reqwest::Client,
    base_url: Url,
    auth_token: SecretString,
}

impl ApiClient {
    /// Create a client from the live configuration.
    #[must_use]
    pub fn new(config: &LiveConfig) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                http: reqwest::Client::new(),
                base_url: config.api_base_url.clone(),
                auth_token: config.auth_token.clone(),
            }),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.inner
            .base_url
            .join(path)
            .map_err(|e| AppError::Api(format!("invalid endpoint {path}: {e}")))
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, AppError> {
        let url = self.endpoint(path)?;
        let request = self.inner.http.get(url).query(query);
        self.execute(path, request).await
    }

    pub(crate) async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, AppError> {
        let url = self.endpoint(path)?;
        let request = self.inner.http.post(url).json(body);
        self.execute(path, request).await
    }

    /// POST a body and discard the envelope's data.
    pub(crate) async fn post_empty(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<(), AppError> {
        let _: serde_json::Value = self.post(path, body).await?;
        Ok(())
    }

    pub(crate) async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T, AppError> {
        let url = self.endpoint(path)?;
        let request = self.inner.http.post(url).multipart(form);
        self.execute(path, request).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        path: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AppError> {
        let response = request
            .bearer_auth(self.inner.auth_token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        // Read the body as text first for better error diagnostics
        let text = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            error!(
                status = %status,
                path = %path,
                body = %text.chars().take(500).collect::<String>(),
                "marketplace API returned non-success status"
            );
            return Err(AppError::Api(format!(
                "HTTP {status}: {}",
                text.chars().take(200).collect::<String>()
            )));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            error!(
                error = %e,
                path = %path,
                body = %text.chars().take(500).collect::<String>(),
                "failed to parse marketplace API response"
            );
            AppError::Api(format!("invalid response from {path}: {e}"))
        })?;

        envelope.into_result(path)
    }
}

/// Structured result wrapper the hosted API answers with.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self, path: &str) -> Result<T, AppError> {
        if self.success {
            return self
                .data
                .ok_or_else(|| AppError::Api(format!("{path}: success without data")));
        }
        let Some(error) = self.error else {
            return Err(AppError::Api(format!("{path}: failure without detail")));
        };
        match error.code.as_deref() {
            Some("not_found") => Err(AppError::NotFound(error.message)),
            Some("validation") => Err(AppError::Validation(error.message)),
            _ => Err(AppError::Api(error.message)),
        }
    }
}
