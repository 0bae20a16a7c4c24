use std::collections::HashMap;
use std::path::PathBuf;

use reqwest::StatusCode;
use reqwest::header::WWW_AUTHENTICATE;
use ring::digest::{Context, SHA256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::{Credentials, Minter};
use crate::error::{HarvestError, Result};
use crate::store::ContentStore;
use crate::types::{Digest, MANIFEST_ACCEPT, Manifest};

/// Outbound pull client for one registry.
///
/// Speaks just enough of the distribution protocol to copy a tag's manifest
/// and blobs: manifest GET with the usual Accept set, blob GET streamed to
/// disk, and bearer-token minting when the registry answers 401.
pub struct RegistryClient {
    client: reqwest::Client,
    base: String,
    minter: Minter,
    tokens: Mutex<HashMap<String, String>>,
}

impl RegistryClient {
    pub fn new(base: impl Into<String>, credentials: Option<Credentials>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("harvester/pull")
            .build()
            .map_err(|err| HarvestError::Configuration {
                reason: format!("could not build HTTP client: {err}"),
            })?;

        Ok(RegistryClient {
            minter: Minter::new(client.clone(), credentials),
            client,
            base: base.into().trim_end_matches('/').to_string(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    async fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut builder = self.client.get(url);
        if let Some(accept) = accept {
            builder = builder.header(reqwest::header::ACCEPT, accept);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        builder
            .send()
            .await
            .map_err(|err| HarvestError::network(url, err))
    }

    /// GET with one authentication round-trip: on 401 a pull token is minted
    /// from the challenge, cached per repository, and the request retried.
    async fn get(&self, repository: &str, url: &str, accept: Option<&str>) -> Result<reqwest::Response> {
        let cached = self.tokens.lock().await.get(repository).cloned();
        let mut response = self.send(url, accept, cached.as_deref()).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            if let Some(challenge) = challenge {
                if let Some(token) = self.minter.mint(&challenge, repository).await? {
                    debug!("Minted pull token for {repository}");
                    self.tokens
                        .lock()
                        .await
                        .insert(repository.to_string(), token.clone());
                    response = self.send(url, accept, Some(&token)).await?;
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Status {
                url: url.to_string(),
                status,
            });
        }

        Ok(response)
    }

    /// Fetches the manifest behind `reference` (a tag or a digest) and
    /// returns it decoded alongside its raw bytes and content digest.
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<(Manifest, Vec<u8>, Digest)> {
        let url = format!("{}/v2/{repository}/manifests/{reference}", self.base);

        let response = self.get(repository, &url, Some(MANIFEST_ACCEPT)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| HarvestError::network(&url, err))?;

        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|err| HarvestError::format(format!("manifest at {url}"), err))?;

        let digest = Digest::sha256_of(&bytes);

        Ok((manifest, bytes.to_vec(), digest))
    }

    /// Streams one blob into the content store, verifying its digest on the
    /// way down. Already-present digests are not re-downloaded.
    pub async fn pull_blob(
        &self,
        repository: &str,
        digest: &Digest,
        store: &ContentStore,
    ) -> Result<PathBuf> {
        if store.contains(digest) {
            debug!("Blob {digest} already in local store; nothing to pull");
            return Ok(store.blob_path(digest));
        }

        let url = format!("{}/v2/{repository}/blobs/{digest}", self.base);
        let mut response = self.get(repository, &url, None).await?;

        let staged = store.staging_path();
        let mut file = tokio::fs::File::create(&staged)
            .await
            .map_err(|err| HarvestError::filesystem(&staged, err))?;

        let mut hasher = Context::new(&SHA256);

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    file.write_all(&chunk)
                        .await
                        .map_err(|err| HarvestError::filesystem(&staged, err))?;
                    hasher.update(&chunk);
                }
                Ok(None) => break,
                Err(err) => return Err(HarvestError::network(&url, err)),
            }
        }

        file.flush()
            .await
            .map_err(|err| HarvestError::filesystem(&staged, err))?;
        drop(file);

        let downloaded = Digest::from_sha256(&hasher.finish());
        if digest != &downloaded {
            return Err(HarvestError::DigestMismatch {
                url,
                expected: digest.to_string(),
                actual: downloaded.to_string(),
            });
        }

        store.commit(&staged, digest).await
    }
}
