//! Image reference parsing
//!
//! Understands the usual `[registry/]repository[:tag][@digest]` form with
//! Docker Hub defaults, which is all the resolver needs to compare
//! references and pick registry-local mirrors.

use crate::error::{PackError, PackResult};
use std::fmt;
use tracing::debug;

/// Registry implied by references without an explicit host
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

const LEGACY_DEFAULT_REGISTRY: &str = "docker.io";
const DEFAULT_TAG: &str = "latest";

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse a reference, applying Docker Hub defaults
    pub fn parse(reference: &str) -> PackResult<Self> {
        let invalid = |reason: &str| PackError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (rest, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(invalid("digest must be <algorithm>:<hex>"));
                }
                (name, Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones are ports
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &rest[split + 1..];
                if tag.is_empty() {
                    return Err(invalid("empty tag"));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), remainder.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        let registry = if registry == LEGACY_DEFAULT_REGISTRY {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };

        if repository.is_empty() || repository.split('/').any(str::is_empty) {
            return Err(invalid("empty repository path component"));
        }
        if repository.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(invalid("repository name must be lowercase"));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host (with port, if any)
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Explicit tag, if one was given
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Digest, if the reference is pinned
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Fully qualified form used to compare references
    ///
    /// Untagged, unpinned references get the `latest` tag.
    pub fn canonical(&self) -> String {
        match (&self.digest, &self.tag) {
            (Some(digest), _) => format!("{}/{}@{}", self.registry, self.repository, digest),
            (None, Some(tag)) => format!("{}/{}:{}", self.registry, self.repository, tag),
            (None, None) => format!("{}/{}:{}", self.registry, self.repository, DEFAULT_TAG),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Registry host a repository name will be published to
pub fn registry(repo_name: &str) -> PackResult<String> {
    Ok(ImageRef::parse(repo_name)?.registry)
}

/// First image hosted on `registry`, in candidate order
pub fn image_by_registry(registry: &str, images: &[String]) -> PackResult<Option<String>> {
    for image in images {
        let reference = ImageRef::parse(image)?;
        if reference.registry == registry {
            debug!("Candidate {} matches registry {}", image, registry);
            return Ok(Some(image.clone()));
        }
    }
    Ok(None)
}
