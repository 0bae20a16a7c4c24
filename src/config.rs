use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

#[derive(Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Base URL of the pull endpoint, e.g. `https://quay.io`.
    pub url: String,
    /// Base URL of the tag-listing API, e.g. `https://quay.io/api/v1`.
    pub api: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: "https://quay.io".to_string(),
            api: "https://quay.io/api/v1".to_string(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct ConcurrencyConfig {
    /// Repository-level admission gate.
    pub repositories: usize,
    /// Blob-extraction admission gate. The two gates are independent, so up
    /// to `repositories * blobs` extraction tasks can be live at once.
    pub blobs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            repositories: 10,
            blobs: 10,
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct TimeoutConfig {
    /// Deadline for one whole tag pull, seconds.
    pub pull: u64,
    /// Deadline for one blob extraction, seconds.
    pub extract: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            pull: 120,
            extract: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn pull_deadline(&self) -> Duration {
        Duration::from_secs(self.pull)
    }

    pub fn extract_deadline(&self) -> Duration {
        Duration::from_secs(self.extract)
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct Configuration {
    pub registry: RegistryConfig,
    /// Root of the extracted-artifact output tree. Mandatory.
    pub output: String,
    /// Root of the local content store.
    pub cache: String,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutConfig,
    /// Docker-style credentials file; the default lookup applies when unset.
    pub credentials: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            output: String::new(),
            cache: "cache".to_string(),
            concurrency: ConcurrencyConfig::default(),
            timeouts: TimeoutConfig::default(),
            credentials: None,
        }
    }
}

impl Configuration {
    pub fn validate(&self) -> Result<()> {
        if self.output.is_empty() {
            return Err(HarvestError::Configuration {
                reason: "an output directory is mandatory".to_string(),
            });
        }
        if self.cache.is_empty() {
            return Err(HarvestError::Configuration {
                reason: "a cache directory is mandatory".to_string(),
            });
        }
        Ok(())
    }
}

pub fn config(path: Option<PathBuf>) -> Result<Configuration> {
    let yaml = match path {
        Some(path) => Yaml::file(path),
        None => Yaml::file("harvester.yaml"),
    };

    Figment::from(Serialized::defaults(Configuration::default()))
        .merge(yaml)
        .merge(Env::prefixed("HARVESTER_").split("_"))
        .extract()
        .map_err(|err| HarvestError::Configuration {
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = config(None).unwrap();
            assert_eq!(config.registry.url, "https://quay.io");
            assert_eq!(config.concurrency.repositories, 10);
            assert_eq!(config.concurrency.blobs, 10);
            assert_eq!(config.timeouts.pull_deadline(), Duration::from_secs(120));
            assert_eq!(config.timeouts.extract_deadline(), Duration::from_secs(60));
            Ok(())
        });
    }

    #[test]
    fn yaml_overrides_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "harvester.yaml",
                r#"
output: /srv/artifacts
timeouts:
  pull: 30
"#,
            )?;
            let config = config(None).unwrap();
            assert_eq!(config.output, "/srv/artifacts");
            assert_eq!(config.timeouts.pull, 30);
            assert_eq!(config.timeouts.extract, 60);
            Ok(())
        });
    }

    #[test]
    fn env_overrides_yaml() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HARVESTER_OUTPUT", "/from/env");
            let config = config(None).unwrap();
            assert_eq!(config.output, "/from/env");
            Ok(())
        });
    }

    #[test]
    fn missing_output_fails_validation() {
        figment::Jail::expect_with(|_jail| {
            let config = config(None).unwrap();
            assert!(config.validate().is_err());
            Ok(())
        });
    }
}
