//! Persistent build cache
//!
//! A cache outlives individual builds and is shared by every build of the
//! same repository name. The restorer copies it into the workspace before
//! analysis and the cacher writes fresh layers back after export.
//!
//! | Backend | Identity | Phase argument | Access |
//! |---------|----------|----------------|--------|
//! | Image | local image `pack-cache-<key>` | `-image=<name>` | daemon |
//! | Volume | named volume `pack-cache-<key>` | `-path=/cache` | none |
//!
//! Builds of the same repository are not serialized against each other;
//! the last cacher to finish wins.

mod image;
mod volume;

pub use image::ImageCache;
pub use volume::VolumeCache;

use crate::config::CacheBackend;
use crate::error::PackResult;
use crate::image::ImageRef;
use crate::orchestration::ContainerRuntime;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Label keys attached to cache volumes
pub mod labels {
    /// Marks a volume as a pack cache
    pub const PACK_CACHE: &str = "io.buildpacks.pack.cache";
    /// Repository name the cache belongs to
    pub const REPOSITORY: &str = "io.buildpacks.pack.cache.repository";
    /// Creation timestamp (RFC3339)
    pub const CREATED_AT: &str = "io.buildpacks.pack.cache.created_at";
}

/// Persistent layer store keyed by repository name
#[async_trait]
pub trait Cache: Send + Sync {
    /// Stable identity, unchanged by `clear`
    fn image(&self) -> &str;

    /// Arguments telling the restorer and cacher where the cache lives
    fn phase_args(&self) -> Vec<String>;

    /// Extra bind mounts for the restorer and cacher
    fn volumes(&self) -> Vec<String>;

    /// Whether the restorer and cacher need the engine socket
    fn needs_daemon(&self) -> bool;

    /// Make sure the backing store exists
    async fn prepare(&self) -> PackResult<()>;

    /// Drop all cached content, keeping the identity
    async fn clear(&self) -> PackResult<()>;
}

/// Cache name for a repository: `pack-cache-` plus 12 hex chars of SHA-256
///
/// The canonical reference is hashed, so `app` and
/// `index.docker.io/library/app:latest` share a cache.
pub fn cache_name(repo_name: &str) -> String {
    let normalized = ImageRef::parse(repo_name)
        .map(|r| r.canonical())
        .unwrap_or_else(|_| repo_name.to_string());
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    format!("pack-cache-{}", &digest[..12])
}

/// Build the cache for `repo_name` on the configured backend
pub fn new_cache(
    backend: CacheBackend,
    repo_name: &str,
    runtime: Arc<dyn ContainerRuntime>,
) -> Arc<dyn Cache> {
    match backend {
        CacheBackend::Image => Arc::new(ImageCache::new(repo_name, runtime)),
        CacheBackend::Volume => Arc::new(VolumeCache::new(repo_name, runtime)),
    }
}
