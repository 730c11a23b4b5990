//! Configuration loader: builds the layered `config` stack and deserializes it.

use super::merge_policy;
use super::sources;
use super::RenderConfig;
use crate::error::RenderError;
use std::path::Path;
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration rooted at `root`.
    ///
    /// Precedence (lowest to highest): defaults, `config/render-worker.toml`,
    /// `config/{RENDER_ENV}.toml`, `RENDER_*` variables, legacy flat variables.
    pub fn load(root: &Path) -> Result<RenderConfig, RenderError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = sources::file::add_to_builder(builder, root)?;
        let builder = sources::env::add_to_builder(builder);

        let mut config: RenderConfig = builder.build()?.try_deserialize()?;
        sources::env::apply_legacy_overrides(&mut config);
        config.storage = config.storage.resolved(root);

        debug!(root = %root.display(), "Configuration loaded");
        config.validated()
    }

    /// Load configuration from one explicit TOML file, without environment layers.
    pub fn load_from_file(path: &Path) -> Result<RenderConfig, RenderError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = sources::file::add_explicit(builder, path)?;
        let config: RenderConfig = builder.build()?.try_deserialize()?;
        config.validated()
    }

    /// Configuration used when nothing is on disk; still honours the environment.
    pub fn load_default() -> Result<RenderConfig, RenderError> {
        let builder = sources::env::add_to_builder(merge_policy::builder_with_defaults()?);
        let mut config: RenderConfig = builder.build()?.try_deserialize()?;
        sources::env::apply_legacy_overrides(&mut config);
        config.validated()
    }
}
