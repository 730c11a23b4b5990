//! Reference image download.

use crate::error::RenderError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Provider label used for download failures
const FETCH_LABEL: &str = "asset-fetch";

/// Upper bound on a reference image
const MAX_ASSET_BYTES: usize = 32 * 1024 * 1024;

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the bytes behind `uri`.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, RenderError>;
}

/// Fetches `http(s)://` over the network and `file://` from local disk
pub struct HttpAssetFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    async fn fetch_file(&self, path: &str) -> Result<Vec<u8>, RenderError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RenderError::InvalidJob(format!("Reference file not found: {}", path))
            }
            _ => RenderError::provider(FETCH_LABEL, format!("Failed to read {}: {}", path, e)),
        })?;
        check_size(bytes.len())?;
        Ok(bytes)
    }

    async fn fetch_http(&self, uri: &str) -> Result<Vec<u8>, RenderError> {
        let response = self.client.get(uri).send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429 {
            return Err(RenderError::InvalidJob(format!(
                "Reference image unavailable ({})",
                status
            )));
        }
        if !status.is_success() {
            return Err(RenderError::provider(
                FETCH_LABEL,
                format!("Download failed with status {}", status),
            ));
        }
        if let Some(length) = response.content_length() {
            check_size(length as usize)?;
        }

        let bytes = response.bytes().await.map_err(|e| self.map_error(e))?;
        check_size(bytes.len())?;
        Ok(bytes.to_vec())
    }

    fn map_error(&self, error: reqwest::Error) -> RenderError {
        if error.is_timeout() {
            RenderError::Timeout {
                provider: FETCH_LABEL.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            RenderError::provider(FETCH_LABEL, format!("Download failed: {}", error))
        }
    }
}

fn check_size(len: usize) -> Result<(), RenderError> {
    if len > MAX_ASSET_BYTES {
        return Err(RenderError::InvalidJob(format!(
            "Reference image exceeds {} bytes",
            MAX_ASSET_BYTES
        )));
    }
    Ok(())
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, RenderError> {
        debug!(scheme = uri.split(':').next().unwrap_or(""), "Fetching reference image");
        if let Some(path) = uri.strip_prefix("file://") {
            self.fetch_file(path).await
        } else if uri.starts_with("http://") || uri.starts_with("https://") {
            self.fetch_http(uri).await
        } else {
            Err(RenderError::InvalidJob(format!(
                "Unsupported reference URI scheme: {}",
                uri
            )))
        }
    }
}
