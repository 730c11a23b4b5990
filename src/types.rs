//! Core identifier types shared across the render pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 32-byte BLAKE3 digest
pub type Hash = [u8; 32];

/// Opaque job identifier assigned by the queue producer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tenant (organization) identifier; the unit of fairness quotas
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Per-tenant outbound event channel name.
    pub fn event_channel(&self) -> String {
        format!("tenant:{}:events", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// URIs of the artifacts produced for one render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderArtifacts {
    pub composite_uri: String,
    pub preview_uri: String,
    pub high_res_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_map_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roughness_map_uri: Option<String>,
}

impl RenderArtifacts {
    /// Every URI in the set, optional maps included when present.
    pub fn uris(&self) -> Vec<&str> {
        let mut uris = vec![
            self.composite_uri.as_str(),
            self.preview_uri.as_str(),
            self.high_res_uri.as_str(),
        ];
        uris.extend(self.normal_map_uri.as_deref());
        uris.extend(self.roughness_map_uri.as_deref());
        uris
    }
}

/// Current time as milliseconds since Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
