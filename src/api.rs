use log::debug;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Deserializer, Serialize};
use std::future::Future;
use std::path::Path;

use crate::config::Config;
use crate::error::ApiError;
use crate::utils::UrlUtils;

/// Raw image bytes plus the metadata the upload endpoint needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read an image from disk, taking the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(file_name, UrlUtils::mime_for_path(path), bytes))
    }
}

/// Response of the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubmitResult {
    pub id: String,
    #[serde(default)]
    pub image_name: String,
}

/// Response of the thumbnails endpoint. An empty list means processing has not finished.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ResultPayload {
    #[serde(default, deserialize_with = "deserialize_thumbnails")]
    pub thumbnails: Vec<String>,
}

impl ResultPayload {
    pub fn new<S: Into<String>>(thumbnails: impl IntoIterator<Item = S>) -> Self {
        Self {
            thumbnails: thumbnails.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_ready(&self) -> bool {
        !self.thumbnails.is_empty()
    }
}

fn deserialize_thumbnails<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Thumbnails {
        Missing(()),
        One(String),
        Many(Vec<String>),
    }

    match Thumbnails::deserialize(deserializer)? {
        Thumbnails::Missing(()) => Ok(Vec::new()),
        Thumbnails::One(url) => Ok(vec![url]),
        Thumbnails::Many(urls) => Ok(urls),
    }
}

/// The two calls the coordinator makes against the processing service.
pub trait ProcessingApi: Send + Sync + 'static {
    fn submit(
        &self,
        image: ImageUpload,
    ) -> impl Future<Output = Result<SubmitResult, ApiError>> + Send;

    fn fetch_result(&self, id: &str) -> impl Future<Output = Result<ResultPayload, ApiError>> + Send;
}

/// HTTP client for the thumbnailing service
pub struct ThumbnailClient {
    client: reqwest::Client,
    base_url: String,
}

impl ThumbnailClient {
    pub fn new(config: &Config) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: &Config, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: config.api_endpoint.clone(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn upload(&self, image: ImageUpload) -> Result<SubmitResult, ApiError> {
        let url = UrlUtils::upload_url(&self.base_url);
        debug!(
            "Uploading {} ({}, {} bytes) to {}",
            image.file_name,
            image.mime_type,
            image.bytes.len(),
            url
        );

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, image.mime_type)
            .body(image.bytes)
            .send()
            .await?;

        let submitted: SubmitResult = Self::read_json(response).await?;
        debug!("Upload accepted with id {}", submitted.id);
        Ok(submitted)
    }

    pub async fn get_thumbnails(&self, id: &str) -> Result<ResultPayload, ApiError> {
        let url = UrlUtils::thumbnails_url(&self.base_url, id);
        let response = self.client.get(&url).send().await?;

        let payload: ResultPayload = Self::read_json(response).await?;
        debug!("Fetched {} thumbnails for {}", payload.thumbnails.len(), id);
        Ok(payload)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

impl ProcessingApi for ThumbnailClient {
    fn submit(
        &self,
        image: ImageUpload,
    ) -> impl Future<Output = Result<SubmitResult, ApiError>> + Send {
        self.upload(image)
    }

    fn fetch_result(&self, id: &str) -> impl Future<Output = Result<ResultPayload, ApiError>> + Send {
        self.get_thumbnails(id)
    }
}
