//! CLI output: error mapping from pipeline errors to a stable CLI surface.

use crate::error::RenderError;

/// Map pipeline errors to a one-line message prefixed with their classification.
pub fn map_error(e: &RenderError) -> String {
    format!("[{}] {}", e.kind(), e)
}
