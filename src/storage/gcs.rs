//! Google Cloud Storage client over the JSON API

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::core::config::StorageSettings;
use crate::core::errors::{Result, ServingError};
use crate::storage::ObjectStore;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectItem>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ObjectItem {
    name: String,
}

/// Cloud Storage client bound to one project
#[derive(Debug, Clone)]
pub struct GcsClient {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    access_token: String,
}

impl GcsClient {
    /// Create a client; fails when no project is configured
    pub fn new(settings: &StorageSettings, access_token: String) -> Result<Self> {
        if settings.project_id.trim().is_empty() {
            return Err(ServingError::MissingEnv {
                name: "PROJECT_ID".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()?;

        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project_id: settings.project_id.clone(),
            access_token,
        })
    }

    /// Point the client at another endpoint, such as a local emulator
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| ServingError::ConfigError {
            message: format!("Invalid storage endpoint {}: {}", self.endpoint, e),
        })?;
        url.path_segments_mut()
            .map_err(|_| ServingError::ConfigError {
                message: format!("Storage endpoint cannot be a base: {}", self.endpoint),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.access_token)
            .header("x-goog-user-project", &self.project_id)
    }

    async fn check(response: Response, resource: String) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ServingError::from_status(status.as_u16(), resource, body))
    }
}

fn network_error(e: reqwest::Error) -> ServingError {
    ServingError::NetworkError {
        message: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for GcsClient {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let url = self.url(&["storage", "v1", "b", bucket, "o"])?;
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .request(reqwest::Method::GET, url.clone())
                .query(&[("prefix", prefix), ("fields", "items(name),nextPageToken")]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request.send().await.map_err(network_error)?;
            let page: ListResponse = Self::check(response, format!("gs://{}/{}", bucket, prefix))
                .await?
                .json()
                .await
                .map_err(|e| ServingError::InvalidResponseError {
                    message: e.to_string(),
                })?;

            names.extend(page.items.into_iter().map(|item| item.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!("Listed {} objects under gs://{}/{}", names.len(), bucket, prefix);
        Ok(names)
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        let url = self.url(&["storage", "v1", "b", bucket, "o", name])?;
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(network_error)?;

        let bytes = Self::check(response, format!("gs://{}/{}", bucket, name))
            .await?
            .bytes()
            .await
            .map_err(network_error)?;
        Ok(bytes.to_vec())
    }

    async fn put(&self, bucket: &str, name: &str, data: Vec<u8>) -> Result<()> {
        let url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        let response = self
            .request(reqwest::Method::POST, url)
            .query(&[("uploadType", "media"), ("name", name)])
            .header("Content-Type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(network_error)?;

        Self::check(response, format!("gs://{}/{}", bucket, name)).await?;
        Ok(())
    }
}
