//! Registry credentials
//!
//! Phases that talk to a registry get credentials for exactly the
//! registries they need, passed in as a `CredentialProvider` value rather
//! than read from the process environment.

mod docker_config;

pub use docker_config::DockerConfigCredentials;

use crate::error::PackResult;
use crate::image::ImageRef;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Environment variable the lifecycle reads registry auth from
pub const REGISTRY_AUTH_ENV: &str = "CNB_REGISTRY_AUTH";

/// Source of registry authorization headers
pub trait CredentialProvider: Send + Sync {
    /// `Authorization` header value for a registry host, if known
    fn authorization(&self, registry: &str) -> Option<String>;
}

/// Fixed in-memory credentials
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    auths: HashMap<String, String>,
}

impl StaticCredentials {
    /// Provider that knows no registries
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add a header value for a registry host
    pub fn with(mut self, registry: impl Into<String>, authorization: impl Into<String>) -> Self {
        self.auths.insert(registry.into(), authorization.into());
        self
    }
}

impl CredentialProvider for StaticCredentials {
    fn authorization(&self, registry: &str) -> Option<String> {
        self.auths.get(registry).cloned()
    }
}

/// Serialized auth map for the images a phase may touch
///
/// Only registries hosting one of `images` are included, so a phase never
/// sees credentials beyond its repository and run image.
pub fn scoped_auth_env(provider: &dyn CredentialProvider, images: &[&str]) -> PackResult<String> {
    let mut auths = BTreeMap::new();
    for image in images {
        let registry = ImageRef::parse(image)?.registry().to_string();
        if auths.contains_key(&registry) {
            continue;
        }
        match provider.authorization(&registry) {
            Some(header) => {
                auths.insert(registry, header);
            }
            None => debug!("No credentials for registry {}", registry),
        }
    }
    Ok(serde_json::to_string(&auths)?)
}
