//! Volume-backed cache

use crate::cache::{cache_name, labels, Cache};
use crate::error::{PackError, PackResult};
use crate::orchestration::ContainerRuntime;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Mount point of the cache volume in the restorer and cacher
pub const CACHE_DIR: &str = "/cache";

/// Cache stored in a named volume
pub struct VolumeCache {
    name: String,
    repo_name: String,
    runtime: Arc<dyn ContainerRuntime>,
}

impl VolumeCache {
    pub fn new(repo_name: &str, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            name: cache_name(repo_name),
            repo_name: repo_name.to_string(),
            runtime,
        }
    }

    /// Labels for volume creation
    pub fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(labels::PACK_CACHE.to_string(), "true".to_string());
        labels.insert(labels::REPOSITORY.to_string(), self.repo_name.clone());
        labels.insert(labels::CREATED_AT.to_string(), Utc::now().to_rfc3339());
        labels
    }

    fn cache_error(&self, e: PackError) -> PackError {
        PackError::Cache {
            name: self.name.clone(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Cache for VolumeCache {
    fn image(&self) -> &str {
        &self.name
    }

    fn phase_args(&self) -> Vec<String> {
        vec![format!("-path={}", CACHE_DIR)]
    }

    fn volumes(&self) -> Vec<String> {
        vec![format!("{}:{}", self.name, CACHE_DIR)]
    }

    fn needs_daemon(&self) -> bool {
        false
    }

    async fn prepare(&self) -> PackResult<()> {
        let exists = self
            .runtime
            .volume_exists(&self.name)
            .await
            .map_err(|e| self.cache_error(e))?;
        if !exists {
            debug!("Creating cache volume {}", self.name);
            self.runtime
                .volume_create(&self.name, &self.labels())
                .await
                .map_err(|e| self.cache_error(e))?;
        }
        Ok(())
    }

    async fn clear(&self) -> PackResult<()> {
        debug!("Clearing cache volume {}", self.name);
        self.runtime
            .volume_remove(&self.name)
            .await
            .map_err(|e| self.cache_error(e))?;
        self.runtime
            .volume_create(&self.name, &self.labels())
            .await
            .map_err(|e| self.cache_error(e))
    }
}
