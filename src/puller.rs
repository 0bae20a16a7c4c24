use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::client::RegistryClient;
use crate::error::{HarvestError, Result};
use crate::extract::BlobExtractor;
use crate::store::ContentStore;
use crate::types::{Manifest, RepositoryReference};

/// Materializes one tag: copies its manifest and blobs into the content
/// store, then extracts archive blobs into the output tree.
pub struct ArtifactPuller {
    client: Arc<RegistryClient>,
    store: Arc<ContentStore>,
    extractor: BlobExtractor,
    output_root: PathBuf,
    timeout: Duration,
}

impl ArtifactPuller {
    pub fn new(
        client: Arc<RegistryClient>,
        store: Arc<ContentStore>,
        extractor: BlobExtractor,
        output_root: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        ArtifactPuller {
            client,
            store,
            extractor,
            output_root: output_root.into(),
            timeout,
        }
    }

    /// The whole call runs under one deadline; expiry fails this tag only.
    pub async fn process_tag(
        &self,
        repository: &RepositoryReference,
        tag: &str,
        created: DateTime<Utc>,
    ) -> Result<()> {
        let deadline = self.timeout;

        tokio::time::timeout(deadline, self.pull_and_extract(repository, tag, created))
            .await
            .map_err(|_| HarvestError::Timeout {
                operation: format!("pulling {}/{}:{tag}", repository.host, repository.path),
                timeout: deadline,
            })?
    }

    async fn pull_and_extract(
        &self,
        repository: &RepositoryReference,
        tag: &str,
        created: DateTime<Utc>,
    ) -> Result<()> {
        let repo = repository.path.as_str();

        let (manifest, bytes, digest) = self.client.fetch_manifest(repo, tag).await?;
        self.store.write_bytes(&digest, &bytes).await?;

        // An index points at further image manifests; follow it one level.
        let mut manifests: Vec<Manifest> = Vec::new();
        if manifest.is_index() {
            for child in &manifest.manifests {
                let reference = child.digest.to_string();
                let (child_manifest, child_bytes, child_digest) =
                    self.client.fetch_manifest(repo, &reference).await?;
                self.store.write_bytes(&child_digest, &child_bytes).await?;
                manifests.push(child_manifest);
            }
        } else {
            manifests.push(manifest);
        }

        for manifest in &manifests {
            for descriptor in manifest.referenced_blobs() {
                self.client
                    .pull_blob(repo, &descriptor.digest, &self.store)
                    .await?;
            }
        }

        let output_dir = self.output_dir(repository, created, tag);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|err| HarvestError::filesystem(&output_dir, err))?;

        // Deliberately scans the whole local blob directory, not only the
        // digests this manifest introduced. See DESIGN.md.
        let report = self
            .extractor
            .extract_dir(&self.store.blob_dir(), &output_dir)
            .await?;

        for (blob, err) in &report.failures {
            warn!(
                "Blob {} of {repository}:{tag} was not extracted: {err}",
                blob.display()
            );
        }

        info!(
            "Harvested {repository}:{tag}: {} blobs extracted, {} ignored, {} failed",
            report.extracted,
            report.skipped,
            report.failures.len()
        );

        Ok(())
    }

    /// `<output root>/<repo>/<YYYY-MM-DD>/<tag>`, the date taken from the
    /// tag's last-modified timestamp.
    pub fn output_dir(
        &self,
        repository: &RepositoryReference,
        created: DateTime<Utc>,
        tag: &str,
    ) -> PathBuf {
        self.output_root
            .join(&repository.path)
            .join(created.format("%Y-%m-%d").to_string())
            .join(tag)
    }
}
