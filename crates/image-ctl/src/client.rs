//! Client for the Golden Image Registry

use anyhow::{Context, Result};
use golden_common::{ImageRecord, ImageState};
use image_selector::ValidationResult;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// Client for interacting with the Image Registry
pub struct RegistryClient {
    base_url: String,
    client: reqwest::Client,
}

/// Registry answer to an ingest
#[derive(Debug, Clone, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub out_of_order: bool,
    pub validation: ValidationResult,
}

/// Outcome of reporting a build
#[derive(Debug)]
pub enum Registration {
    Recorded(IngestResponse),
    /// The registry already knows this image
    AlreadyRecorded,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    image: ImageRecord,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    images: Vec<ImageRecord>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl RegistryClient {
    /// Create a new registry client
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            base_url: registry_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Report a built image
    pub async fn ingest(&self, record: &ImageRecord) -> Result<Registration> {
        let url = format!("{}/api/images", self.base_url);
        debug!("Reporting image {} to {}", record.id, url);

        let response = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .context("Failed to connect to Image Registry")?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(Registration::AlreadyRecorded);
        }

        let response = error_for_status(response, "Failed to record image").await?;
        let ingest: IngestResponse = response
            .json()
            .await
            .context("Failed to parse ingest response")?;

        Ok(Registration::Recorded(ingest))
    }

    /// Latest valid image for an environment
    pub async fn latest(&self, environment: &str) -> Result<Option<ImageRecord>> {
        let url = format!("{}/api/environments/{}/latest", self.base_url, environment);
        self.get_image_at(&url).await
    }

    /// Image by id
    pub async fn get(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        let url = format!("{}/api/images/{}", self.base_url, image_id);
        self.get_image_at(&url).await
    }

    /// Validate a stored image against the registry policy
    pub async fn validation(&self, image_id: &str) -> Result<Option<ValidationResult>> {
        let url = format!("{}/api/images/{}/validation", self.base_url, image_id);
        debug!("Fetching validation from registry: {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = error_for_status(response, "Failed to validate image").await?;
        let result = response
            .json()
            .await
            .context("Failed to parse validation response")?;
        Ok(Some(result))
    }

    /// Report a state change for an image
    pub async fn set_state(&self, image_id: &str, state: ImageState) -> Result<ImageRecord> {
        let url = format!("{}/api/images/{}/state", self.base_url, image_id);
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "state": state }))
            .send()
            .await?;

        let response = error_for_status(response, "Failed to change image state").await?;
        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image response")?;
        Ok(image.image)
    }

    /// Deregister an available image
    pub async fn deregister(&self, image_id: &str) -> Result<ImageRecord> {
        let url = format!("{}/api/images/{}/deregister", self.base_url, image_id);
        let response = self.client.post(&url).send().await?;

        let response = error_for_status(response, "Failed to deregister image").await?;
        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image response")?;
        Ok(image.image)
    }

    /// Build history of an environment, oldest first
    pub async fn history(&self, environment: &str) -> Result<Vec<ImageRecord>> {
        let url = format!("{}/api/environments/{}/images", self.base_url, environment);
        let response = self.client.get(&url).send().await?;

        let response = error_for_status(response, "Failed to fetch history").await?;
        let history: HistoryResponse = response
            .json()
            .await
            .context("Failed to parse history response")?;
        Ok(history.images)
    }

    /// Check if registry is healthy
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    async fn get_image_at(&self, url: &str) -> Result<Option<ImageRecord>> {
        debug!("Fetching image from registry: {}", url);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = error_for_status(response, "Failed to fetch image").await?;
        let image: ImageResponse = response
            .json()
            .await
            .context("Failed to parse image response")?;
        Ok(Some(image.image))
    }
}

/// Turn a non-success response into an error carrying the registry's message
async fn error_for_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => "Unknown error".to_string(),
    };
    anyhow::bail!("{} ({}): {}", what, status, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_client_creation() {
        let client = RegistryClient::new("http://localhost:8083/");
        assert_eq!(client.base_url(), "http://localhost:8083");
    }
}
