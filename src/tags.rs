use tracing::debug;

use crate::error::{HarvestError, Result};
use crate::types::{TagInfo, TagPage};

pub const TAG_PAGE_SIZE: usize = 100;

/// Pages through a registry's tag-listing API for one repository.
pub struct TagFetcher {
    client: reqwest::Client,
    api_base: String,
}

impl TagFetcher {
    pub fn new(api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("harvester/tags")
            .build()
            .map_err(|err| HarvestError::Configuration {
                reason: format!("could not build HTTP client: {err}"),
            })?;

        Ok(TagFetcher {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetches every tag of `repository`, in server order, stopping at the
    /// first empty page. Any network or decode failure aborts the whole
    /// fetch; pages already read are discarded.
    pub async fn fetch_tags(&self, repository: &str) -> Result<Vec<TagInfo>> {
        let mut tags = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repository/{repository}/tag/?limit={TAG_PAGE_SIZE}&page={page}",
                self.api_base
            );

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|err| HarvestError::network(&url, err))?;

            let status = response.status();
            if !status.is_success() {
                return Err(HarvestError::Status { url, status });
            }

            let body: TagPage = response
                .json()
                .await
                .map_err(|err| HarvestError::format(format!("tag listing at {url}"), err))?;

            if body.tags.is_empty() {
                break;
            }

            debug!("Fetched {} tags from page {page} of {repository}", body.tags.len());
            tags.extend(body.tags);
            page += 1;
        }

        Ok(tags)
    }
}
