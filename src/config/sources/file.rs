//! File sources: config/render-worker.toml and config/{RENDER_ENV}.toml

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Add the base and environment-specific config files under `root/config` to the builder.
/// Missing files are skipped.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let config_dir = root.join("config");
    let env_name = std::env::var("RENDER_ENV").unwrap_or_else(|_| "development".to_string());

    let mut builder = builder;

    for path in [
        config_dir.join("render-worker.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ] {
        if path.exists() {
            debug!(config_path = %path.display(), "Adding config file source");
            builder = builder.add_source(File::from(path).required(false));
        }
    }

    Ok(builder)
}

/// Add a single explicit file. Unlike the directory layout, the file must exist.
pub fn add_explicit(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    Ok(builder.add_source(File::from(path).required(true)))
}
