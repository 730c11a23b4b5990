//! Render assets: reference downloads, derived images and artifact storage.

pub mod derive;
pub mod fetch;
pub mod store;

pub use derive::{derive_images, DerivedImages};
pub use fetch::{AssetFetcher, HttpAssetFetcher};
pub use store::{store_all, ArtifactKind, ArtifactStore, FsArtifactStore};
