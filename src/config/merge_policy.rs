//! Merge rules: defaults first, files next, environment last.

use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Only scalar keys that other layers commonly override are seeded here; every other
/// field falls back to its serde default during deserialization.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("pipeline.dry_run", false)?
        .set_default("pipeline.max_tokens_per_job", 10_000_i64)?
        .set_default("pipeline.default_tenant_concurrency", 2_i64)?
        .set_default("providers.primary_enabled", true)?
        .set_default("providers.fallback_endpoint", "http://localhost:7860")
}
