//! Job model and the versioned inbound payload schema.
//!
//! Payloads are validated at the queue boundary: the wire schema is a closed tagged enum
//! with unknown fields rejected, and [`JobPayload::into_job`] checks every identifier and
//! URI before a [`Job`] exists. Anything that fails here never reaches the processor.

use crate::error::RenderError;
use crate::types::{JobId, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_ID_LEN: usize = 128;
const MAX_RAW_PROMPT_BYTES: usize = 64 * 1024;
const MAX_STYLE_LEN: usize = 64;

/// Inbound queue payload, one variant per job type and schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobPayload {
    #[serde(rename = "texture-render.v1")]
    TextureRenderV1(TextureRenderV1),
}

/// `texture-render.v1` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TextureRenderV1 {
    pub job_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub prompt: String,
    pub base_image_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_uri: Option<String>,
    #[serde(default)]
    pub options: RenderOptions,
    #[serde(default)]
    pub attempt: u32,
}

/// Quality tier requested from the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Hd,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Hd => "hd",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Square generation size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetSize {
    #[serde(rename = "512x512")]
    Small,
    #[default]
    #[serde(rename = "1024x1024")]
    Medium,
    #[serde(rename = "2048x2048")]
    Large,
}

impl TargetSize {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            TargetSize::Small => (512, 512),
            TargetSize::Medium => (1024, 1024),
            TargetSize::Large => (2048, 2048),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TargetSize::Small => "512x512",
            TargetSize::Medium => "1024x1024",
            TargetSize::Large => "2048x2048",
        }
    }
}

/// Render options carried by a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RenderOptions {
    #[serde(default)]
    pub quality: Quality,
    #[serde(default, rename = "size")]
    pub target_size: TargetSize,
    /// Style name appended to the prompt before generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default)]
    pub generate_normal_map: bool,
    #[serde(default)]
    pub generate_roughness_map: bool,
}

/// A validated unit of rendering work
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub job_id: JobId,
    pub tenant_id: TenantId,
    pub user_id: Option<String>,
    /// Raw prompt; only ever passed to the safety gate
    pub prompt: String,
    pub base_image_uri: String,
    pub mask_uri: Option<String>,
    pub options: RenderOptions,
    /// 1-based delivery attempt
    pub attempt: u32,
}

impl JobPayload {
    /// Decode and validate a raw queue message.
    pub fn decode(bytes: &[u8]) -> Result<Job, RenderError> {
        let payload: JobPayload = serde_json::from_slice(bytes)
            .map_err(|e| RenderError::InvalidJob(format!("malformed payload: {}", e)))?;
        payload.into_job()
    }

    /// Validate into a [`Job`].
    pub fn into_job(self) -> Result<Job, RenderError> {
        match self {
            JobPayload::TextureRenderV1(body) => body.into_job(),
        }
    }
}

impl TextureRenderV1 {
    fn into_job(self) -> Result<Job, RenderError> {
        validate_id("jobId", &self.job_id)?;
        validate_id("tenantId", &self.tenant_id)?;
        if let Some(user_id) = &self.user_id {
            validate_id("userId", user_id)?;
        }
        validate_uri("baseImageUri", &self.base_image_uri)?;
        if let Some(mask_uri) = &self.mask_uri {
            validate_uri("maskUri", mask_uri)?;
        }
        if self.prompt.len() > MAX_RAW_PROMPT_BYTES {
            return Err(RenderError::InvalidJob(format!(
                "prompt exceeds {} bytes",
                MAX_RAW_PROMPT_BYTES
            )));
        }
        if let Some(style) = &self.options.style {
            if style.chars().count() > MAX_STYLE_LEN {
                return Err(RenderError::InvalidJob(format!(
                    "style exceeds {} characters",
                    MAX_STYLE_LEN
                )));
            }
        }

        Ok(Job {
            job_id: JobId::new(self.job_id),
            tenant_id: TenantId::new(self.tenant_id),
            user_id: self.user_id,
            prompt: self.prompt,
            base_image_uri: self.base_image_uri,
            mask_uri: self.mask_uri,
            options: self.options,
            attempt: self.attempt.max(1),
        })
    }
}

impl Job {
    /// Re-encode as the current payload version, e.g. for redelivery.
    pub fn to_payload(&self) -> JobPayload {
        JobPayload::TextureRenderV1(TextureRenderV1 {
            job_id: self.job_id.as_str().to_string(),
            tenant_id: self.tenant_id.as_str().to_string(),
            user_id: self.user_id.clone(),
            prompt: self.prompt.clone(),
            base_image_uri: self.base_image_uri.clone(),
            mask_uri: self.mask_uri.clone(),
            options: self.options.clone(),
            attempt: self.attempt,
        })
    }
}

/// Identifiers end up in storage paths and channel names, so they are restricted to a
/// conservative character set.
fn validate_id(field: &str, value: &str) -> Result<(), RenderError> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Err(RenderError::InvalidJob(format!(
            "{} must be 1..={} characters",
            field, MAX_ID_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(RenderError::InvalidJob(format!("{} is not a valid id", field)));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(RenderError::InvalidJob(format!(
            "{} contains characters outside [A-Za-z0-9._-]",
            field
        )));
    }
    Ok(())
}

fn validate_uri(field: &str, value: &str) -> Result<(), RenderError> {
    let supported = ["http://", "https://", "file://"];
    match supported.iter().find(|scheme| value.starts_with(**scheme)) {
        Some(scheme) if value.len() > scheme.len() => Ok(()),
        _ => Err(RenderError::InvalidJob(format!(
            "{} must be an http(s) or file URI",
            field
        ))),
    }
}
