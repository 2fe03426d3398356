//! Build lifecycle
//!
//! Owns the per-build workspace volume and creates the phase containers
//! that run against it.
//!
//! # Resources
//!
//! | Resource | Acquired | Released |
//! |----------|----------|----------|
//! | Workspace volume `pack-workspace-<uuid>` | `Lifecycle::new` | `Lifecycle::cleanup` |
//! | Ephemeral builder `pack.local/builder/<uuid>` | `Lifecycle::new` (overrides only) | `Lifecycle::cleanup` |
//! | Phase container | `Lifecycle::new_phase` | `Phase::cleanup` |
//! | Helper containers (copy, chown, read) | per call | same call |
//!
//! Anything not released explicitly is removed in the background on drop.

pub mod buildpacks;
pub mod descriptors;
pub mod ownership;
pub mod phase;

pub use buildpacks::{resolve_buildpacks, BuildpackSource};
pub use descriptors::{
    GroupDescriptor, APP_DIR, BUILDPACKS_DIR, GROUP_PATH, LAUNCH_DIR, ORDER_PATH, PLAN_PATH,
    PLATFORM_DIR,
};
pub use ownership::{resolve_identity, Identity, OwnershipReconciler};
pub use phase::{AccessMode, Phase, PhaseName};

use crate::cancel::Cancellation;
use crate::credentials::CredentialProvider;
use crate::error::{PackError, PackResult, ResultExt};
use crate::logging::LogSink;
use crate::orchestration::{ContainerConfig, ContainerRuntime};
use buildpacks::StagedContent;
use phase::PhaseContainer;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Command given to containers that are created but never started
const IDLE_COMMAND: &str = "true";

/// Inputs for provisioning a lifecycle
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub builder_image: String,
    pub app_dir: PathBuf,
    pub buildpacks: Vec<BuildpackSource>,
    pub env: BTreeMap<String, String>,
    /// Directory of the phase binaries in the builder
    pub lifecycle_dir: String,
}

/// Collaborators shared by everything a lifecycle creates
#[derive(Clone)]
pub struct LifecycleContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub sink: Arc<dyn LogSink>,
}

/// One build's workspace and the phases run against it
pub struct Lifecycle {
    ctx: LifecycleContext,
    builder_image: String,
    phase_image: String,
    ephemeral_image: Option<String>,
    workspace_volume: String,
    lifecycle_dir: String,
    released: bool,
}

impl Lifecycle {
    /// Provision the workspace: create the volume, bake overrides into an
    /// ephemeral builder, then copy the app in owned by the builder identity
    ///
    /// Anything acquired is released again if provisioning fails.
    pub async fn new(
        config: LifecycleConfig,
        ctx: LifecycleContext,
        cancel: &Cancellation,
    ) -> PackResult<Self> {
        let workspace_volume = format!("pack-workspace-{}", Uuid::new_v4().simple());
        let mut labels = HashMap::new();
        labels.insert("author".to_string(), "pack".to_string());

        ctx.runtime
            .volume_create(&workspace_volume, &labels)
            .await
            .context("create workspace volume")?;
        debug!("Created workspace volume {}", workspace_volume);

        let mut lifecycle = Self {
            ctx,
            builder_image: config.builder_image.clone(),
            phase_image: config.builder_image.clone(),
            ephemeral_image: None,
            workspace_volume,
            lifecycle_dir: config.lifecycle_dir.clone(),
            released: false,
        };

        if let Err(e) = lifecycle.provision(&config, cancel).await {
            lifecycle.cleanup().await;
            return Err(e);
        }

        Ok(lifecycle)
    }

    async fn provision(&mut self, config: &LifecycleConfig, cancel: &Cancellation) -> PackResult<()> {
        if let Some(staged) = StagedContent::stage(&config.buildpacks, &config.env).await? {
            self.commit_staged(&staged)
                .await
                .context("stage buildpacks and platform env")?;
        }

        if cancel.is_cancelled() {
            return Err(PackError::PhaseCancelled {
                phase: "provision".to_string(),
            });
        }

        self.copy_app(&config.app_dir).await.context("copy app to workspace")?;
        self.reconcile_ownership(APP_DIR, cancel)
            .await
            .context("chown app dir")?;
        Ok(())
    }

    /// Bake staged content into a throwaway image derived from the builder
    async fn commit_staged(&mut self, staged: &StagedContent) -> PackResult<()> {
        let tag = format!("pack.local/builder/{}", Uuid::new_v4().simple());
        let config = ContainerConfig::new(&self.builder_image).with_label("author", "pack");
        let container_id = self
            .ctx
            .runtime
            .create(&config, &[IDLE_COMMAND.to_string()])
            .await?;

        // Recorded first so cleanup removes a partially committed image
        self.ephemeral_image = Some(tag.clone());

        let result = async {
            if let Some(dir) = staged.buildpacks_dir() {
                self.ctx
                    .runtime
                    .copy_into(&container_id, &dir, BUILDPACKS_DIR)
                    .await?;
            }
            if let Some(dir) = staged.platform_dir() {
                self.ctx
                    .runtime
                    .copy_into(&container_id, &dir, PLATFORM_DIR)
                    .await?;
            }
            self.ctx.runtime.commit(&container_id, &tag).await
        }
        .await;

        self.remove_helper(&container_id).await;
        result?;

        info!("Using ephemeral builder {}", tag);
        self.phase_image = tag;
        Ok(())
    }

    async fn copy_app(&self, app_dir: &Path) -> PackResult<()> {
        let container_id = self.create_helper().await?;
        let result = self
            .ctx
            .runtime
            .copy_into(&container_id, app_dir, APP_DIR)
            .await;
        self.remove_helper(&container_id).await;
        result
    }

    async fn create_helper(&self) -> PackResult<String> {
        let config = ContainerConfig::new(&self.phase_image)
            .with_volume(format!("{}:{}", self.workspace_volume, LAUNCH_DIR))
            .with_label("author", "pack");
        self.ctx
            .runtime
            .create(&config, &[IDLE_COMMAND.to_string()])
            .await
    }

    async fn remove_helper(&self, container_id: &str) {
        if let Err(e) = self.ctx.runtime.remove(container_id).await {
            warn!("Failed to remove helper container {}: {}", container_id, e);
        }
    }

    /// Hand `path` (recursively) to the identity declared by the builder
    pub async fn reconcile_ownership(&self, path: &str, cancel: &Cancellation) -> PackResult<()> {
        let identity = resolve_identity(self.ctx.runtime.as_ref(), &self.builder_image)
            .await
            .context("get pack uid and gid")?;
        OwnershipReconciler::new(
            Arc::clone(&self.ctx.runtime),
            self.phase_image.clone(),
            Arc::clone(&self.ctx.sink),
        )
        .chown(&self.workspace_volume, path, identity, cancel)
        .await
    }

    /// Create the container for a phase
    pub async fn new_phase(
        &self,
        name: PhaseName,
        args: Vec<String>,
        access: AccessMode,
    ) -> PackResult<Phase> {
        self.new_phase_with_volumes(name, args, access, Vec::new())
            .await
    }

    /// Create the container for a phase with extra bind mounts
    pub async fn new_phase_with_volumes(
        &self,
        name: PhaseName,
        args: Vec<String>,
        access: AccessMode,
        extra_volumes: Vec<String>,
    ) -> PackResult<Phase> {
        let container = PhaseContainer {
            image: self.phase_image.clone(),
            workspace_volume: self.workspace_volume.clone(),
            lifecycle_dir: self.lifecycle_dir.clone(),
            extra_volumes,
        };
        let (config, command) = container.config(
            name,
            &args,
            &access,
            self.ctx.runtime.as_ref(),
            self.ctx.credentials.as_ref(),
        )?;

        let container_id = self
            .ctx
            .runtime
            .create(&config, &command)
            .await
            .with_context(|| format!("create {} container", name))?;

        Ok(Phase::new(
            name,
            Arc::clone(&self.ctx.runtime),
            Arc::clone(&self.ctx.sink),
            container_id,
        ))
    }

    /// Read a file out of the workspace volume
    pub async fn read_workspace_file(&self, path: &str) -> PackResult<String> {
        let temp = TempDir::new().map_err(|e| PackError::io("creating temp dir", e))?;
        let dest = temp.path().join("file");

        let container_id = self.create_helper().await?;
        let result = self
            .ctx
            .runtime
            .copy_from(&container_id, path, &dest)
            .await;
        self.remove_helper(&container_id).await;
        result.with_context(|| format!("read {}", path))?;

        tokio::fs::read_to_string(&dest)
            .await
            .map_err(|e| PackError::io(format!("reading copied {}", path), e))
    }

    /// Workspace volume name
    pub fn workspace_volume(&self) -> &str {
        &self.workspace_volume
    }

    /// Image the phases run from: the builder, or its ephemeral derivative
    pub fn phase_image(&self) -> &str {
        &self.phase_image
    }

    /// Remove the ephemeral builder and the workspace volume
    ///
    /// Best effort: failures are logged, never returned. Safe to repeat.
    pub async fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(image) = self.ephemeral_image.take() {
            if let Err(e) = self.ctx.runtime.image_remove(&image).await {
                warn!("Failed to remove ephemeral builder {}: {}", image, e);
            }
        }
        if let Err(e) = self.ctx.runtime.volume_remove(&self.workspace_volume).await {
            warn!(
                "Failed to remove workspace volume {}: {}",
                self.workspace_volume, e
            );
        } else {
            debug!("Removed workspace volume {}", self.workspace_volume);
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            "Workspace {} was not cleaned up, removing in background",
            self.workspace_volume
        );
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, volume {} leaked", self.workspace_volume);
            return;
        };
        let runtime = Arc::clone(&self.ctx.runtime);
        let volume = self.workspace_volume.clone();
        let image = self.ephemeral_image.take();
        handle.spawn(async move {
            if let Some(image) = image {
                if let Err(e) = runtime.image_remove(&image).await {
                    warn!("Background removal of {} failed: {}", image, e);
                }
            }
            if let Err(e) = runtime.volume_remove(&volume).await {
                warn!("Background removal of {} failed: {}", volume, e);
            }
        });
    }
}
