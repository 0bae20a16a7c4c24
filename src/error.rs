use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the harvesting pipeline.
///
/// Every variant is scoped to a single operation: a failed tag listing
/// aborts one repository, a failed pull aborts one tag, a failed
/// extraction aborts one blob. Nothing is retried automatically.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("configuration: {reason}")]
    Configuration { reason: String },

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },

    #[error("malformed {what}: {reason}")]
    Format { what: String, reason: String },

    #[error("filesystem operation on {path} failed: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("digest mismatch for {url}: expected {expected}, downloaded {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },
}

impl HarvestError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn format(what: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Format {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_walkdir(root: &std::path::Path, err: walkdir::Error) -> Self {
        let path = err
            .path()
            .map(std::path::Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf());
        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
        Self::Filesystem { path, source }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;
