//! Container engine shared types
//!
//! Contains data structures exchanged with container runtimes.
//! The actual engine execution logic is in the runtime implementations.

use serde::Deserialize;
use std::collections::HashMap;

/// Container configuration for creating a new container
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    /// Container image to use
    pub image: String,
    /// User to run as (image default when `None`)
    pub user: Option<String>,
    /// Working directory inside the container
    pub workdir: Option<String>,
    /// Volume and bind mounts (source:target[:mode] format)
    pub volumes: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Container labels
    pub labels: HashMap<String, String>,
    /// Network mode (engine default when `None`)
    pub network: Option<String>,
}

impl ContainerConfig {
    /// Create a config for `image` with everything else defaulted
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Add a volume mount
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    /// Run as a specific user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Add a container label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Which output stream a container line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The subset of `image inspect` output the build pipeline relies on
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageInfo {
    /// Local image ID
    #[serde(rename = "Id", default)]
    pub id: String,
    /// Registry digests (`name@sha256:...`)
    #[serde(rename = "RepoDigests", default, deserialize_with = "null_as_default")]
    pub repo_digests: Vec<String>,
    /// Image config (labels, env)
    #[serde(rename = "Config", default)]
    pub config: ImageConfig,
    /// Root filesystem layer digests, bottom first
    #[serde(rename = "RootFS", default)]
    pub rootfs: RootFs,
}

/// Image config section of `image inspect`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageConfig {
    #[serde(rename = "Labels", default, deserialize_with = "null_as_default")]
    pub labels: HashMap<String, String>,
    #[serde(rename = "Env", default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
}

/// Root filesystem section of `image inspect`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RootFs {
    #[serde(rename = "Layers", default, deserialize_with = "null_as_default")]
    pub layers: Vec<String>,
}

/// Treat an explicit JSON `null` like a missing field
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ImageInfo {
    /// Parse the JSON array printed by `docker|podman image inspect`
    pub fn parse_inspect(json: &str) -> serde_json::Result<Option<Self>> {
        let mut images: Vec<ImageInfo> = serde_json::from_str(json)?;
        Ok(if images.is_empty() {
            None
        } else {
            Some(images.swap_remove(0))
        })
    }

    /// Value of a label; empty values count as absent
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .labels
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value of an environment variable baked into the image
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.config.env.iter().find_map(|kv| {
            let (key, value) = kv.split_once('=')?;
            (key == name).then_some(value)
        })
    }

    /// Registry digest of the image (`sha256:...`), if it has one
    pub fn digest(&self) -> Option<&str> {
        self.repo_digests
            .first()
            .and_then(|d| d.split_once('@'))
            .map(|(_, digest)| digest)
    }

    /// Digest of the topmost filesystem layer
    pub fn top_layer(&self) -> Option<&str> {
        self.rootfs.layers.last().map(String::as_str)
    }
}
