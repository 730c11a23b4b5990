//! Local diffusion container (fallback provider).
//!
//! `POST {endpoint}/api/inpaint` with a JSON body carrying base64 images. The container
//! answers with either inline base64 or a URL to fetch the result from.

use super::{
    build_provider_http_client, error_from_response, map_http_error, CostEstimator,
    GeneratedImage, GenerationRequest, ImageProvider,
};
use crate::error::RenderError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const PROVIDER_NAME: &str = "local-diffusion";

pub struct LocalDiffusionClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
    estimator: Arc<dyn CostEstimator>,
}

#[derive(Serialize)]
struct InpaintRequest<'a> {
    image_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask_base64: Option<String>,
    prompt: &'a str,
    quality: &'static str,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct InpaintResponse {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl LocalDiffusionClient {
    pub fn new(
        endpoint: String,
        timeout: Duration,
        estimator: Arc<dyn CostEstimator>,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            client: build_provider_http_client(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
            estimator,
        })
    }

    async fn fetch_result(&self, url: &str) -> Result<Vec<u8>, RenderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_http_error(PROVIDER_NAME, self.timeout, e))?;
        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_http_error(PROVIDER_NAME, self.timeout, e))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageProvider for LocalDiffusionClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, RenderError> {
        let (width, height) = request.size.dimensions();
        let body = InpaintRequest {
            image_base64: BASE64.encode(request.base_image),
            mask_base64: request.mask.map(|m| BASE64.encode(m)),
            prompt: request.prompt,
            quality: request.quality.as_str(),
            width,
            height,
        };

        let url = format!("{}/api/inpaint", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_http_error(PROVIDER_NAME, self.timeout, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }

        let result: InpaintResponse = response.json().await.map_err(|e| {
            RenderError::provider(PROVIDER_NAME, format!("Failed to parse response: {}", e))
        })?;

        let bytes = match (result.image_base64, result.image_url.or(result.url)) {
            (Some(encoded), _) => BASE64.decode(encoded).map_err(|e| {
                RenderError::provider(PROVIDER_NAME, format!("Invalid image encoding: {}", e))
            })?,
            (None, Some(url)) => self.fetch_result(&url).await?,
            (None, None) => {
                return Err(RenderError::provider(PROVIDER_NAME, "No image returned"));
            }
        };

        Ok(GeneratedImage {
            bytes,
            tokens_used: self.estimator.estimate_tokens(request),
            provider: PROVIDER_NAME.to_string(),
        })
    }
}
