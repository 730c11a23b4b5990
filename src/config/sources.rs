//! Configuration sources layered on top of the merge-policy defaults.

pub mod env;
pub mod file;
