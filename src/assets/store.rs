//! Artifact storage.
//!
//! Paths are a pure function of tenant, job and artifact kind, so a redelivered job
//! overwrites its earlier artifacts instead of adding new ones.

use super::DerivedImages;
use crate::error::StorageError;
use crate::types::{JobId, RenderArtifacts, TenantId};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::path::{Path, PathBuf};

/// Kind of stored artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Composite,
    Preview,
    HighRes,
    NormalMap,
    RoughnessMap,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Composite => "composite",
            ArtifactKind::Preview => "preview",
            ArtifactKind::HighRes => "highres",
            ArtifactKind::NormalMap => "normal-map",
            ArtifactKind::RoughnessMap => "roughness-map",
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store one PNG artifact and return its URI.
    async fn put(
        &self,
        tenant: &TenantId,
        job: &JobId,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<String, StorageError>;
}

/// Filesystem store under `{root}/renders/{tenant}/{job}-{kind}.png`
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create the store, resolving a relative `root` against the working directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        let root = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir()?.join(root)
        };
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic location of an artifact.
    pub fn path_for(&self, tenant: &TenantId, job: &JobId, kind: ArtifactKind) -> PathBuf {
        self.root
            .join("renders")
            .join(tenant.as_str())
            .join(format!("{}-{}.png", job, kind.as_str()))
    }
}

fn ensure_path_component(value: &str) -> Result<(), StorageError> {
    if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(StorageError::InvalidPath(value.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        tenant: &TenantId,
        job: &JobId,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        ensure_path_component(tenant.as_str())?;
        ensure_path_component(job.as_str())?;

        let path = self.path_for(tenant, job, kind);
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
        tokio::fs::create_dir_all(parent).await?;

        // Write then rename so readers never see a partial file.
        let staging = path.with_extension("png.partial");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path).await?;

        Ok(format!("file://{}", path.display()))
    }
}

/// Store every derived image concurrently and collect the URIs.
pub async fn store_all(
    store: &dyn ArtifactStore,
    tenant: &TenantId,
    job: &JobId,
    images: &DerivedImages,
) -> Result<RenderArtifacts, StorageError> {
    let mut pending: Vec<(ArtifactKind, &[u8])> = vec![
        (ArtifactKind::Composite, images.composite.as_slice()),
        (ArtifactKind::Preview, images.preview.as_slice()),
        (ArtifactKind::HighRes, images.high_res.as_slice()),
    ];
    if let Some(normal) = &images.normal_map {
        pending.push((ArtifactKind::NormalMap, normal.as_slice()));
    }
    if let Some(roughness) = &images.roughness_map {
        pending.push((ArtifactKind::RoughnessMap, roughness.as_slice()));
    }

    let uris = try_join_all(pending.into_iter().map(|(kind, bytes)| async move {
        store.put(tenant, job, kind, bytes).await.map(|uri| (kind, uri))
    }))
    .await?;

    let find = |kind: ArtifactKind| {
        uris.iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, uri)| uri.clone())
    };
    Ok(RenderArtifacts {
        composite_uri: find(ArtifactKind::Composite).unwrap_or_default(),
        preview_uri: find(ArtifactKind::Preview).unwrap_or_default(),
        high_res_uri: find(ArtifactKind::HighRes).unwrap_or_default(),
        normal_map_uri: find(ArtifactKind::NormalMap),
        roughness_map_uri: find(ArtifactKind::RoughnessMap),
    })
}
