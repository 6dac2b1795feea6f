//! Proof image upload.
//!
//! The core never inspects image bytes; the uploader turns a blob into a
//! storable reference string.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::ProofRef;

use super::ApiClient;

/// The consumed upload interface.
#[async_trait]
pub trait ProofUploader: Send + Sync {
    /// Upload an image blob and return its storage reference.
    async fn upload(&self, image: &[u8]) -> Result<ProofRef, AppError>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    reference: String,
}

/// `ProofUploader` over the hosted REST backend.
#[derive(Clone)]
pub struct HttpProofUploader {
    client: ApiClient,
}

impl HttpProofUploader {
    /// Create an uploader over the shared client.
    #[must_use]
    pub const fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProofUploader for HttpProofUploader {
    async fn upload(&self, image: &[u8]) -> Result<ProofRef, AppError> {
        let part = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name("proof.jpg")
            .mime_str("image/jpeg")
            .map_err(AppError::Network)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response: UploadResponse = self.client.post_multipart("uploads", form).await?;
        Ok(ProofRef::new(response.reference))
    }
}
