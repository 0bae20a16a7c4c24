use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{HarvestError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Default, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Registry credentials read from a docker-style `config.json`.
///
/// Missing or unreadable credentials are not fatal: pulls proceed
/// unauthenticated unless the registry demands otherwise.
#[derive(Default)]
pub struct CredentialStore {
    auths: HashMap<String, Credentials>,
}

impl CredentialStore {
    /// Loads credentials from `path`, or from `$DOCKER_CONFIG/config.json` /
    /// `$HOME/.docker/config.json` when no path is given.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => return Self::default(),
        };

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                debug!("No usable docker config at {}: {err}", path.display());
                return Self::default();
            }
        };

        let config: DockerConfig = match serde_json::from_slice(&raw) {
            Ok(config) => config,
            Err(err) => {
                warn!("Ignoring malformed docker config {}: {err}", path.display());
                return Self::default();
            }
        };

        let mut auths = HashMap::new();
        for (host, entry) in config.auths {
            if let Some(credentials) = decode_auth(&entry) {
                auths.insert(host, credentials);
            }
        }

        CredentialStore { auths }
    }

    pub fn lookup(&self, host: &str) -> Option<&Credentials> {
        self.auths.get(host)
    }
}

fn default_config_path() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker").join("config.json"))
}

fn decode_auth(entry: &DockerAuth) -> Option<Credentials> {
    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Some(Credentials {
            username: username.clone(),
            password: password.clone(),
        });
    }

    let encoded = entry.auth.as_deref()?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// Parameters of a `Www-Authenticate: Bearer` challenge.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Challenge {
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

pub(crate) fn parse_challenge(header: &str) -> Challenge {
    let mut challenge = Challenge::default();

    let Some(params) = header.strip_prefix("Bearer ") else {
        return challenge;
    };

    for param in params.split(',') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "realm" => challenge.realm = Some(value),
            "service" => challenge.service = Some(value),
            "scope" => challenge.scope = Some(value),
            _ => {}
        }
    }

    challenge
}

/// Mints short-lived pull tokens from a registry's token endpoint.
pub(crate) struct Minter {
    client: reqwest::Client,
    credentials: Option<Credentials>,
}

impl Minter {
    pub fn new(client: reqwest::Client, credentials: Option<Credentials>) -> Self {
        Minter {
            client,
            credentials,
        }
    }

    /// Exchanges a bearer challenge for a token. Returns `None` when the
    /// challenge carries no realm to mint against.
    pub async fn mint(&self, header: &str, repository: &str) -> Result<Option<String>> {
        let challenge = parse_challenge(header);

        let Some(realm) = challenge.realm else {
            return Ok(None);
        };

        let scope = challenge
            .scope
            .unwrap_or_else(|| format!("repository:{repository}:pull"));

        let mut query = vec![("scope", scope)];
        if let Some(service) = challenge.service {
            query.push(("service", service));
        }

        let mut builder = self.client.get(&realm).query(&query);
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }

        let response = builder
            .send()
            .await
            .map_err(|err| HarvestError::network(&realm, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Status { url: realm, status });
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| HarvestError::format(format!("token response from {realm}"), err))?;

        Ok(Some(payload.token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_bearer_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://quay.io/v2/auth",service="quay.io",scope="repository:org/repo:pull""#,
        );
        assert_eq!(challenge.realm.as_deref(), Some("https://quay.io/v2/auth"));
        assert_eq!(challenge.service.as_deref(), Some("quay.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:org/repo:pull"));
    }

    #[test]
    fn parse_non_bearer_challenge() {
        let challenge = parse_challenge(r#"Basic realm="registry""#);
        assert_eq!(challenge, Challenge::default());
    }

    #[test]
    fn load_docker_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let auth = STANDARD.encode("robot:hunter2");
        write!(file, r#"{{"auths": {{"quay.io": {{"auth": "{auth}"}}}}}}"#).unwrap();

        let store = CredentialStore::load(Some(file.path()));
        let credentials = store.lookup("quay.io").unwrap();
        assert_eq!(credentials.username, "robot");
        assert_eq!(credentials.password, "hunter2");
        assert!(store.lookup("ghcr.io").is_none());
    }

    #[test]
    fn missing_docker_config_is_not_fatal() {
        let store = CredentialStore::load(Some(Path::new("/does/not/exist.json")));
        assert!(store.lookup("quay.io").is_none());
    }
}
