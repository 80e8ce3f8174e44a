//! Upload collaborator: turns attachment bytes into durable URLs.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const IMGBB_ENDPOINT: &str = "https://api.imgbb.com/1/upload";

/// An attachment received with a broadcast request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected: {0}")]
    Rejected(String),

    #[error("no upload service configured")]
    Unavailable,
}

#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &Upload) -> Result<String, UploadError>;
}

pub struct ImgbbUploader {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ImgbbResponse {
    success: bool,
    data: Option<ImgbbImage>,
    error: Option<ImgbbErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ImgbbImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ImgbbErrorBody {
    message: Option<String>,
}

impl ImgbbUploader {
    pub fn new(http: reqwest::Client, api_key: String) -> Self {
        Self {
            http,
            api_key,
            endpoint: IMGBB_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl Uploader for ImgbbUploader {
    async fn upload(&self, file: &Upload) -> Result<String, UploadError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&file.bytes);

        let response: ImgbbResponse = self
            .http
            .post(&self.endpoint)
            .query(&[("key", self.api_key.as_str())])
            .form(&[("image", encoded.as_str()), ("name", file.file_name.as_str())])
            .send()
            .await?
            .json()
            .await?;

        let url = url_from_response(response)?;
        debug!(file = %file.file_name, url = %url, "Attachment uploaded");
        Ok(url)
    }
}

fn url_from_response(response: ImgbbResponse) -> Result<String, UploadError> {
    match response.data {
        Some(image) if response.success => Ok(image.url),
        _ => Err(UploadError::Rejected(
            response
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string()),
        )),
    }
}
