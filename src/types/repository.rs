use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A reference to a repository in a remote registry, optionally pinned to a
/// single tag. Immutable once parsed.
#[derive(Clone, Debug, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryReference {
    pub host: String,
    pub path: String,
    pub tag: Option<String>,
}

impl RepositoryReference {
    /// Requires the reference to carry a tag, as the single-repository pull
    /// path does.
    pub fn require_tag(&self) -> Result<&str, &'static str> {
        self.tag.as_deref().ok_or("tag is missing in the reference")
    }
}

impl FromStr for RepositoryReference {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, rest) = s
            .split_once('/')
            .ok_or("the reference must start with a registry host")?;

        // Distinguish "quay.io/ns/repo" from a bare "ns/repo" path.
        if !host.contains('.') && !host.contains(':') {
            return Err("the reference must start with a registry host");
        }

        if rest.is_empty() {
            return Err("the reference is missing a repository path");
        }

        let (path, tag) = match rest.rsplit_once(':') {
            Some((path, tag)) if !tag.contains('/') => {
                if tag.is_empty() {
                    return Err("the reference has an empty tag");
                }
                (path.to_string(), Some(tag.to_string()))
            }
            _ => (rest.to_string(), None),
        };

        Ok(RepositoryReference {
            host: host.to_string(),
            path,
            tag,
        })
    }
}

impl TryFrom<String> for RepositoryReference {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepositoryReference> for String {
    fn from(reference: RepositoryReference) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for RepositoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}/{}:{}", self.host, self.path, tag),
            None => write!(f, "{}/{}", self.host, self.path),
        }
    }
}
