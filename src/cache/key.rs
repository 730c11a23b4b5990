//! Content-addressed cache key.

use crate::job::{Quality, TargetSize};
use crate::types::{Hash, TenantId};
use std::fmt;

/// Digest identifying one generation request. Also the coalescing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Hash);

/// Inputs that determine a generation's output
#[derive(Debug, Clone, Copy)]
pub struct KeyParts<'a> {
    pub tenant_id: &'a TenantId,
    /// Final sanitized prompt text, after enhancement
    pub prompt: &'a str,
    pub style: Option<&'a str>,
    pub size: TargetSize,
    pub quality: Quality,
    pub base_image_uri: &'a str,
    pub mask_uri: Option<&'a str>,
    /// Derived maps are part of the cached artifact set
    pub normal_map: bool,
    pub roughness_map: bool,
}

impl CacheKey {
    /// Derive the key. Fields are length-prefixed so adjacent values cannot alias.
    pub fn derive(parts: &KeyParts<'_>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"render-cache-v1");
        update_field(&mut hasher, parts.tenant_id.as_str());
        update_field(&mut hasher, parts.prompt);
        update_optional(&mut hasher, parts.style);
        update_field(&mut hasher, parts.size.as_str());
        update_field(&mut hasher, parts.quality.as_str());
        update_field(&mut hasher, parts.base_image_uri);
        update_optional(&mut hasher, parts.mask_uri);
        hasher.update(&[parts.normal_map as u8, parts.roughness_map as u8]);
        CacheKey(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

fn update_field(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn update_optional(hasher: &mut blake3::Hasher, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update(&[1]);
            update_field(hasher, v);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..12])
    }
}
