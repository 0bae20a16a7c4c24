use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{HarvestError, Result};
use crate::types::Digest;

/// A digest-addressed directory of pulled content.
///
/// Blobs live flat under `<root>/blobs/<algo>/<hex>`, mirroring the registry's
/// own addressing. The store is append-only within a run: a digest, once
/// committed, is never rewritten.
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let store = ContentStore { root };

        for dir in [store.blob_dir(), store.staging_dir()] {
            std::fs::create_dir_all(&dir).map_err(|err| HarvestError::filesystem(dir, err))?;
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory the blob extractor scans. Only sha256 content lands
    /// here in practice.
    pub fn blob_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root.join("blobs").join(&digest.algo).join(&digest.hash)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// A unique scratch path for an in-flight download. Committed content is
    /// renamed into place so a half-written file never appears under a digest.
    pub fn staging_path(&self) -> PathBuf {
        self.staging_dir()
            .join(Uuid::new_v4().as_hyphenated().to_string())
    }

    /// Moves a fully-downloaded staging file under its digest. If the digest
    /// already exists the staged copy is discarded and the existing file wins.
    pub async fn commit(&self, staged: &Path, digest: &Digest) -> Result<PathBuf> {
        let target = self.blob_path(digest);

        if target.is_file() {
            tokio::fs::remove_file(staged)
                .await
                .map_err(|err| HarvestError::filesystem(staged, err))?;
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| HarvestError::filesystem(parent, err))?;
        }

        tokio::fs::rename(staged, &target)
            .await
            .map_err(|err| HarvestError::filesystem(&target, err))?;

        Ok(target)
    }

    /// Stores a small fully-buffered object (a manifest) under its digest.
    pub async fn write_bytes(&self, digest: &Digest, bytes: &[u8]) -> Result<PathBuf> {
        let target = self.blob_path(digest);
        if target.is_file() {
            return Ok(target);
        }

        let staged = self.staging_path();
        tokio::fs::write(&staged, bytes)
            .await
            .map_err(|err| HarvestError::filesystem(&staged, err))?;

        self.commit(&staged, digest).await
    }
}
