use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, warn};

use crate::error::{HarvestError, Result};
use crate::pool::TaskPool;
use crate::puller::ArtifactPuller;
use crate::tags::TagFetcher;
use crate::types::{RepositoryReference, TagInfo};

/// Tags at or below this size are degenerate pushes (an empty artifact) and
/// are never pulled.
pub const MIN_TAG_SIZE: i64 = 2;

/// One repository that could not be processed.
#[derive(Debug)]
pub struct RepositoryFailure {
    pub repository: RepositoryReference,
    pub error: HarvestError,
}

/// Fans out over repositories under a bounded admission gate, harvesting
/// every recent tag of each.
///
/// Failures are isolated: a failed repository is recorded in the aggregate
/// result without disturbing its siblings, and a failed tag is logged
/// without aborting the rest of its repository. The consumer wants whatever
/// could be harvested, not all-or-nothing success.
pub struct RepositoryProcessor {
    tags: Arc<TagFetcher>,
    puller: Arc<ArtifactPuller>,
    limit: usize,
}

impl RepositoryProcessor {
    pub fn new(tags: Arc<TagFetcher>, puller: Arc<ArtifactPuller>, limit: usize) -> Self {
        RepositoryProcessor {
            tags,
            puller,
            limit,
        }
    }

    /// Processes every repository, at most `limit` at a time, and returns
    /// the failures once all of them have finished.
    pub async fn process_repositories(
        &self,
        repositories: Vec<RepositoryReference>,
        since: TimeDelta,
    ) -> Vec<RepositoryFailure> {
        let mut pool = TaskPool::new(self.limit);

        for repository in repositories {
            let tags = self.tags.clone();
            let puller = self.puller.clone();

            pool.spawn(async move {
                match process_repository(&tags, &puller, &repository, since).await {
                    Ok(()) => None,
                    Err(error) => Some(RepositoryFailure { repository, error }),
                }
            });
        }

        pool.join_all().await.into_iter().flatten().collect()
    }
}

async fn process_repository(
    tags: &TagFetcher,
    puller: &ArtifactPuller,
    repository: &RepositoryReference,
    since: TimeDelta,
) -> Result<()> {
    let all_tags = tags.fetch_tags(&repository.path).await?;
    let now = Utc::now();

    let mut seen = HashSet::new();
    let mut harvested = 0usize;

    for tag in retained(&all_tags, since, now) {
        // A (repo, tag) pair is processed at most once per run.
        if !seen.insert(tag.name.clone()) {
            continue;
        }

        match puller
            .process_tag(repository, &tag.name, tag.last_modified)
            .await
        {
            Ok(()) => harvested += 1,
            Err(err) => {
                // Best effort: the tag may have been deleted upstream since
                // it was listed. Record and move on.
                warn!("Tag {} of {repository} could not be harvested: {err}", tag.name);
            }
        }
    }

    info!("Repository {repository}: {harvested} tags harvested");

    Ok(())
}

/// Tags modified within the `since` window and large enough to carry
/// content. Server order is preserved.
fn retained<'t>(
    tags: &'t [TagInfo],
    since: TimeDelta,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'t TagInfo> {
    tags.iter()
        .filter(move |tag| now - tag.last_modified < since && tag.size > MIN_TAG_SIZE)
}
