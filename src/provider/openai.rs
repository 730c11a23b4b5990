//! Hosted image-edit provider (OpenAI `images/edits`).
//!
//! Only serves jobs that carry a mask; the endpoint edits the masked region of the base
//! image. Images come back inline as base64 so no second download is needed.

use super::{
    build_provider_http_client, error_from_response, map_http_error, CostEstimator,
    GeneratedImage, GenerationRequest, ImageProvider,
};
use crate::error::RenderError;
use crate::job::TargetSize;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const PROVIDER_NAME: &str = "openai";

/// Image-edit client
pub struct OpenAIImageEditClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
    estimator: Arc<dyn CostEstimator>,
}

#[derive(Deserialize)]
struct EditResponse {
    data: Vec<EditImage>,
    #[serde(default)]
    usage: Option<EditUsage>,
}

#[derive(Deserialize)]
struct EditImage {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Deserialize)]
struct EditUsage {
    total_tokens: u64,
}

impl OpenAIImageEditClient {
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        timeout: Duration,
        estimator: Arc<dyn CostEstimator>,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            client: build_provider_http_client(timeout)?,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            timeout,
            estimator,
        })
    }

    fn image_part(bytes: &[u8], file_name: &'static str) -> Result<Part, RenderError> {
        Part::bytes(bytes.to_vec())
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| RenderError::provider(PROVIDER_NAME, format!("Invalid part: {}", e)))
    }
}

/// The edit endpoint tops out at 1024x1024; larger targets are upscaled afterwards.
fn edit_size(size: TargetSize) -> &'static str {
    match size {
        TargetSize::Small => "512x512",
        TargetSize::Medium | TargetSize::Large => "1024x1024",
    }
}

#[async_trait]
impl ImageProvider for OpenAIImageEditClient {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn accepts(&self, request: &GenerationRequest<'_>) -> bool {
        request.mask.is_some()
    }

    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<GeneratedImage, RenderError> {
        let mask = request
            .mask
            .ok_or_else(|| RenderError::provider(PROVIDER_NAME, "Image edit requires a mask"))?;

        let form = Form::new()
            .part("image", Self::image_part(request.base_image, "base.png")?)
            .part("mask", Self::image_part(mask, "mask.png")?)
            .text("prompt", request.prompt.to_string())
            .text("model", self.model.clone())
            .text("n", "1")
            .text("size", edit_size(request.size))
            .text("response_format", "b64_json");

        let url = format!("{}/images/edits", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_http_error(PROVIDER_NAME, self.timeout, e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER_NAME, response).await);
        }

        let body: EditResponse = response.json().await.map_err(|e| {
            RenderError::provider(PROVIDER_NAME, format!("Failed to parse response: {}", e))
        })?;
        let encoded = body
            .data
            .first()
            .and_then(|image| image.b64_json.as_deref())
            .ok_or_else(|| RenderError::provider(PROVIDER_NAME, "No image returned"))?;
        let bytes = BASE64.decode(encoded).map_err(|e| {
            RenderError::provider(PROVIDER_NAME, format!("Invalid image encoding: {}", e))
        })?;

        let tokens_used = match body.usage {
            Some(usage) if usage.total_tokens > 0 => usage.total_tokens,
            _ => self.estimator.estimate_tokens(request),
        };

        Ok(GeneratedImage {
            bytes,
            tokens_used,
            provider: PROVIDER_NAME.to_string(),
        })
    }
}
