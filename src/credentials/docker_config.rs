//! Credentials from the engine's `config.json`

use crate::credentials::CredentialProvider;
use crate::error::{PackError, PackResult};
use crate::image::DEFAULT_REGISTRY;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
}

/// Registry auths loaded from `<dir>/config.json`
#[derive(Debug, Clone, Default)]
pub struct DockerConfigCredentials {
    auths: HashMap<String, String>,
    source: Option<PathBuf>,
}

impl DockerConfigCredentials {
    /// Load auths from `dir/config.json`; a missing file yields no credentials
    pub async fn load(dir: &Path) -> PackResult<Self> {
        let path = dir.join("config.json");
        if !path.exists() {
            debug!("No registry auth file at {}", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| PackError::io(format!("reading {}", path.display()), e))?;

        Self::parse(&content, &path)
    }

    fn parse(content: &str, path: &Path) -> PackResult<Self> {
        let file: DockerConfigFile =
            serde_json::from_str(content).map_err(|e| PackError::CredentialsInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let auths = file
            .auths
            .into_iter()
            .filter_map(|(key, entry)| {
                let auth = entry.auth.filter(|a| !a.is_empty())?;
                Some((normalize_registry(&key), format!("Basic {}", auth)))
            })
            .collect::<HashMap<_, _>>();

        debug!("Loaded {} registry auths from {}", auths.len(), path.display());
        Ok(Self {
            auths,
            source: Some(path.to_path_buf()),
        })
    }

    /// File the auths came from, if one existed
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

impl CredentialProvider for DockerConfigCredentials {
    fn authorization(&self, registry: &str) -> Option<String> {
        self.auths.get(registry).cloned()
    }
}

/// Reduce an auths key (`https://index.docker.io/v1/`, `gcr.io`) to a host
fn normalize_registry(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(key);
    if host == "docker.io" {
        DEFAULT_REGISTRY.to_string()
    } else {
        host.to_string()
    }
}
