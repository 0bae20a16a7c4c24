use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{TimeDelta, Utc};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use harvester::auth::CredentialStore;
use harvester::client::RegistryClient;
use harvester::extract::{BlobExtractor, decompress_gz_file, gz_files_under};
use harvester::processor::RepositoryProcessor;
use harvester::puller::ArtifactPuller;
use harvester::store::ContentStore;
use harvester::tags::TagFetcher;
use harvester::types::RepositoryReference;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Opt {
    #[clap(short, long, value_parser)]
    pub config: Option<PathBuf>,

    /// One repository reference with a tag, e.g. quay.io/org/repo:pr-42
    #[clap(long, conflicts_with = "repos")]
    pub repo: Option<String>,

    /// Repositories to harvest recent tags from
    #[clap(long, num_args = 1.., requires = "since")]
    pub repos: Vec<String>,

    /// Recency window for --repos, e.g. 4h, 30m, 2d
    #[clap(long, requires = "repos")]
    pub since: Option<String>,

    /// Output tree for extracted artifacts
    #[clap(long)]
    pub output: Option<String>,

    /// Content-store cache directory
    #[clap(long)]
    pub cache: Option<String>,

    /// Remove the content-store cache once done
    #[clap(long)]
    pub no_cache: bool,

    /// Decompress standalone .gz files in the output tree after harvesting
    #[clap(long)]
    pub uncompress_gz_files: bool,
}

/// Durations like "90m", "4h" or "2d".
fn parse_since(since: &str) -> anyhow::Result<TimeDelta> {
    let (value, unit) = since.split_at(since.len().saturating_sub(1));
    let value: i64 = value
        .parse()
        .with_context(|| format!("invalid duration {since:?}"))?;

    match unit {
        "s" => Ok(TimeDelta::seconds(value)),
        "m" => Ok(TimeDelta::minutes(value)),
        "h" => Ok(TimeDelta::hours(value)),
        "d" => Ok(TimeDelta::days(value)),
        _ => bail!("invalid duration {since:?}: expected a s/m/h/d suffix"),
    }
}

fn registry_host(url: &str) -> &str {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup the logger
    tracing_subscriber::fmt()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = Opt::parse();

    let mut config = harvester::config::config(options.config)?;
    if let Some(output) = options.output {
        config.output = output;
    }
    if let Some(cache) = options.cache {
        config.cache = cache;
    }

    if options.repo.is_none() && options.repos.is_empty() {
        bail!("either --repo or --repos must be specified");
    }

    config.validate()?;

    let host = registry_host(&config.registry.url).to_string();
    let credentials = CredentialStore::load(config.credentials.as_deref().map(Path::new))
        .lookup(&host)
        .cloned();

    let store = Arc::new(ContentStore::new(&config.cache)?);
    let client = Arc::new(RegistryClient::new(&config.registry.url, credentials)?);
    let extractor = BlobExtractor::new(
        config.concurrency.blobs,
        config.timeouts.extract_deadline(),
    );
    let puller = Arc::new(ArtifactPuller::new(
        client,
        store,
        extractor,
        &config.output,
        config.timeouts.pull_deadline(),
    ));

    if let Some(repo) = &options.repo {
        let reference: RepositoryReference = repo.parse().map_err(anyhow::Error::msg)?;
        let tag = reference.require_tag().map_err(anyhow::Error::msg)?.to_string();

        if reference.host != host {
            warn!("Reference host {} differs from configured registry {host}", reference.host);
        }

        puller.process_tag(&reference, &tag, Utc::now()).await?;
    }

    if !options.repos.is_empty() {
        let since = options
            .since
            .as_deref()
            .map(parse_since)
            .transpose()?
            .context("the --repos flag requires the --since flag")?;

        info!("Harvesting artifacts modified within the last {since}");

        let mut repositories = Vec::new();
        for repo in &options.repos {
            let reference: RepositoryReference = repo.parse().map_err(anyhow::Error::msg)?;
            if reference.host != host {
                warn!("Reference host {} differs from configured registry {host}", reference.host);
            }
            repositories.push(reference);
        }

        let fetcher = Arc::new(TagFetcher::new(&config.registry.api)?);
        let processor = RepositoryProcessor::new(
            fetcher,
            puller.clone(),
            config.concurrency.repositories,
        );

        let failures = processor.process_repositories(repositories, since).await;
        for failure in &failures {
            warn!("Repository {}: {}", failure.repository, failure.error);
        }
    }

    if options.uncompress_gz_files {
        for gz_file in gz_files_under(Path::new(&config.output))? {
            let dest_dir = gz_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(&config.output));

            match decompress_gz_file(&gz_file, &dest_dir) {
                Ok(_) => {
                    if let Err(err) = std::fs::remove_file(&gz_file) {
                        warn!("Could not remove {}: {err}", gz_file.display());
                    }
                }
                Err(err) => {
                    warn!("File {} was not decompressed: {err}", gz_file.display());
                }
            }
        }
    }

    if options.no_cache {
        if let Err(err) = std::fs::remove_dir_all(&config.cache) {
            warn!("Could not remove cache directory {}: {err}", config.cache);
        }
    }

    Ok(())
}
