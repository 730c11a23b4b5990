//! Environment sources.
//!
//! Structured keys arrive as `RENDER_<SECTION>__<FIELD>` (for example
//! `RENDER_PIPELINE__DRY_RUN=true`). The flat names older deployments set
//! (`DRY_RUN_MODE`, `LOCAL_DIFFUSION_URL`, ...) are applied afterwards and win.

use crate::config::RenderConfig;
use config::builder::DefaultState;
use config::ConfigBuilder;
use config::Environment;
use tracing::warn;

/// Add the `RENDER_` environment layer to the builder.
pub fn add_to_builder(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("RENDER")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    )
}

/// Apply the flat legacy variables from the process environment.
pub fn apply_legacy_overrides(config: &mut RenderConfig) {
    apply_legacy_overrides_from(config, |name| std::env::var(name).ok());
}

/// Apply the flat legacy variables using `lookup` as the environment.
///
/// Unparseable values are logged and ignored so a typo cannot silently zero a limit.
pub fn apply_legacy_overrides_from<F>(config: &mut RenderConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("OPENAI_IMAGE_EDIT_ENABLED") {
        match parse_flag(&value) {
            Some(flag) => config.providers.primary_enabled = flag,
            None => warn_ignored("OPENAI_IMAGE_EDIT_ENABLED", &value),
        }
    }
    if let Some(value) = lookup("DRY_RUN_MODE") {
        match parse_flag(&value) {
            Some(flag) => config.pipeline.dry_run = flag,
            None => warn_ignored("DRY_RUN_MODE", &value),
        }
    }
    if let Some(value) = lookup("LOCAL_DIFFUSION_URL") {
        if !value.trim().is_empty() {
            config.providers.fallback_endpoint = value.trim().to_string();
        }
    }
    if let Some(value) = lookup("OPENAI_API_KEY") {
        if !value.trim().is_empty() {
            config.providers.openai_api_key = Some(value.trim().to_string());
        }
    }
    if let Some(limit) = positive::<u64>(&lookup, "MAX_TOKENS_PER_JOB") {
        config.pipeline.max_tokens_per_job = limit;
    }
    if let Some(limit) = positive::<u32>(&lookup, "DEFAULT_TENANT_CONCURRENCY") {
        config.pipeline.default_tenant_concurrency = limit;
    }
    if let Some(threshold) = positive::<u32>(&lookup, "CIRCUIT_BREAKER_THRESHOLD") {
        config.pipeline.circuit_breaker.failure_threshold = threshold;
    }
    if let Some(timeout_ms) = positive::<u64>(&lookup, "CIRCUIT_BREAKER_TIMEOUT") {
        config.pipeline.circuit_breaker.open_timeout_ms = timeout_ms;
    }
}

/// Parse a strictly positive integer variable; zero and garbage are ignored.
fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = lookup(name)?;
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => Some(parsed),
        _ => {
            warn_ignored(name, &value);
            None
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn warn_ignored(name: &str, value: &str) {
    warn!(variable = name, value = value, "Ignoring unparseable environment override");
}
