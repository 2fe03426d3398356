//! Image-backed cache

use crate::cache::{cache_name, Cache};
use crate::error::{PackError, PackResult};
use crate::orchestration::ContainerRuntime;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Cache stored as a local image written by the cacher
pub struct ImageCache {
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageCache {
    pub fn new(repo_name: &str, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: cache_name(repo_name),
            runtime,
        }
    }
}

#[async_trait]
impl Cache for ImageCache {
    fn image(&self) -> &str {
        &self.name
    }

    fn phase_args(&self) -> Vec<String> {
        vec![format!("-image={}", self.name)]
    }

    fn volumes(&self) -> Vec<String> {
        Vec::new()
    }

    fn needs_daemon(&self) -> bool {
        true
    }

    async fn prepare(&self) -> PackResult<()> {
        // The cacher creates the image on first use
        Ok(())
    }

    async fn clear(&self) -> PackResult<()> {
        debug!("Clearing cache image {}", self.name);
        self.runtime
            .image_remove(&self.name)
            .await
            .map_err(|e| PackError::Cache {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }
}
