//! Container runtime abstraction
//!
//! Provides a trait for the container operations the build pipeline needs,
//! implemented by the CLI-backed engines (Docker, Podman) and by test fakes.

use crate::error::PackResult;
use crate::orchestration::container::{ContainerConfig, ImageInfo, OutputStream};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

/// Abstract container runtime interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure the engine is installed and reachable
    async fn ensure_ready(&self) -> PackResult<()>;

    /// Create (but do not start) a container and return its ID
    async fn create(&self, config: &ContainerConfig, command: &[String]) -> PackResult<String>;

    /// Start a created container, stream its output and wait for it to exit
    ///
    /// Returns the container's exit code.
    async fn start_attached(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(OutputStream, String) + Send + Sync),
    ) -> PackResult<i32>;

    /// Kill a running container immediately
    async fn kill(&self, container_id: &str) -> PackResult<()>;

    /// Remove a container; succeeds if it is already gone
    async fn remove(&self, container_id: &str) -> PackResult<()>;

    /// Copy the contents of a local directory (or a single file) into a
    /// container path, preserving file modes
    async fn copy_into(&self, container_id: &str, src: &Path, dest: &str) -> PackResult<()>;

    /// Copy a single file out of a container to a local path
    async fn copy_from(&self, container_id: &str, src: &str, dest: &Path) -> PackResult<()>;

    /// Commit a container's filesystem to a new image tag
    async fn commit(&self, container_id: &str, tag: &str) -> PackResult<()>;

    /// Check if an image exists locally
    async fn image_exists(&self, image: &str) -> PackResult<bool>;

    /// Pull an image from its registry
    async fn pull(&self, image: &str) -> PackResult<()>;

    /// Inspect a local image; `None` when it does not exist
    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInfo>>;

    /// Remove a local image; succeeds if it is already gone
    async fn image_remove(&self, image: &str) -> PackResult<()>;

    /// Create a named volume (no-op if it exists)
    async fn volume_create(&self, name: &str, labels: &HashMap<String, String>) -> PackResult<()>;

    /// Check if a volume exists
    async fn volume_exists(&self, name: &str) -> PackResult<bool>;

    /// Remove a volume; succeeds if it is already gone
    async fn volume_remove(&self, name: &str) -> PackResult<()>;

    /// Host path of the engine's control socket, bind-mounted for daemon access
    fn daemon_socket(&self) -> &str;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
