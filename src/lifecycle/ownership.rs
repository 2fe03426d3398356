//! Ownership reconciliation
//!
//! Phases run as different users. Before export, everything under the
//! launch directory is handed to the numeric identity the builder image
//! declares through `PACK_USER_ID` and `PACK_GROUP_ID`.

use crate::cancel::Cancellation;
use crate::error::{PackError, PackResult};
use crate::lifecycle::descriptors::LAUNCH_DIR;
use crate::logging::LogSink;
use crate::orchestration::{ContainerConfig, ContainerRuntime, ImageInfo};
use std::sync::Arc;
use tracing::{debug, warn};

/// Builder env var holding the app user id
pub const USER_ID_VAR: &str = "PACK_USER_ID";
/// Builder env var holding the app group id
pub const GROUP_ID_VAR: &str = "PACK_GROUP_ID";

/// Numeric owner for workspace content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

impl Identity {
    /// Read the identity declared in an inspected builder image
    pub fn from_image(builder: &str, info: &ImageInfo) -> PackResult<Self> {
        let read = |var: &str| -> PackResult<u32> {
            let value = info
                .env_var(var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PackError::MissingIdentity {
                    image: builder.to_string(),
                    var: var.to_string(),
                })?;
            value.trim().parse().map_err(|_| PackError::MalformedIdentity {
                var: var.to_string(),
                value: value.to_string(),
            })
        };

        Ok(Self {
            uid: read(USER_ID_VAR)?,
            gid: read(GROUP_ID_VAR)?,
        })
    }

    /// `uid:gid` as accepted by `chown`
    pub fn owner(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }
}

/// Inspect the builder and read its identity
pub async fn resolve_identity(runtime: &dyn ContainerRuntime, builder: &str) -> PackResult<Identity> {
    let info = runtime
        .image_inspect(builder)
        .await?
        .ok_or_else(|| PackError::ImageNotFound(builder.to_string()))?;
    Identity::from_image(builder, &info)
}

/// Runs root helper containers that chown workspace content
pub struct OwnershipReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
    sink: Arc<dyn LogSink>,
}

impl OwnershipReconciler {
    /// `image` must provide `chown`; the builder always does
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            runtime,
            image: image.into(),
            sink,
        }
    }

    /// Recursively chown `path` inside the workspace volume
    ///
    /// The helper container is removed whether or not chown succeeds.
    pub async fn chown(
        &self,
        workspace_volume: &str,
        path: &str,
        identity: Identity,
        cancel: &Cancellation,
    ) -> PackResult<()> {
        if cancel.is_cancelled() {
            return Err(PackError::PhaseCancelled {
                phase: "chown".to_string(),
            });
        }

        let config = ContainerConfig::new(&self.image)
            .with_user("root")
            .with_volume(format!("{}:{}", workspace_volume, LAUNCH_DIR))
            .with_label("author", "pack");
        let command = vec![
            "chown".to_string(),
            "-R".to_string(),
            identity.owner(),
            path.to_string(),
        ];

        debug!("Chowning {} to {}", path, identity.owner());
        let container_id = self.runtime.create(&config, &command).await?;

        let result = self.run(&container_id, cancel).await;

        if let Err(e) = self.runtime.remove(&container_id).await {
            warn!("Failed to remove chown container {}: {}", container_id, e);
        }

        result
    }

    async fn run(&self, container_id: &str, cancel: &Cancellation) -> PackResult<()> {
        let sink = Arc::clone(&self.sink);
        let on_output = move |stream, line: String| sink.write(stream, &line);

        let code = tokio::select! {
            code = self.runtime.start_attached(container_id, &on_output) => code?,
            _ = cancel.cancelled() => {
                if let Err(e) = self.runtime.kill(container_id).await {
                    debug!("Kill of chown container failed: {}", e);
                }
                return Err(PackError::PhaseCancelled { phase: "chown".to_string() });
            }
        };

        if code != 0 {
            return Err(PackError::command_exec(
                "chown",
                format!("helper container exited with status code: {}", code),
            ));
        }
        Ok(())
    }
}
