//! Token cost estimation.
//!
//! The image-edit endpoints bill per image and return no usage, so cost is approximated
//! from payload size and prompt length. The estimate is deterministic and at least 1.

use super::GenerationRequest;

pub trait CostEstimator: Send + Sync {
    /// Estimated tokens for `request`; never zero.
    fn estimate_tokens(&self, request: &GenerationRequest<'_>) -> u64;
}

/// `ceil((base_bytes + mask_bytes) / 4 + prompt_chars / 4)`, minimum 1
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteLengthEstimator;

impl CostEstimator for ByteLengthEstimator {
    fn estimate_tokens(&self, request: &GenerationRequest<'_>) -> u64 {
        let payload = request.base_image.len() as u64 + request.mask.map_or(0, |m| m.len() as u64);
        let prompt = request.prompt.chars().count() as u64;
        // ceil(a/4 + b/4) == ceil((a + b) / 4)
        (payload + prompt).div_ceil(4).max(1)
    }
}

/// Cost in cents for `tokens` spent at `provider`.
pub fn cost_cents(provider: &str, tokens: u64) -> u64 {
    // Rates in millionths of a cent per token.
    let micro_cents_per_token: u64 = match provider {
        "openai" => 20,
        "local-diffusion" => 1,
        _ => 0,
    };
    (tokens * micro_cents_per_token).div_ceil(1_000_000)
}
