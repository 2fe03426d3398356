//! Phase execution
//!
//! A phase is one run of a lifecycle binary in its own container, with
//! the workspace volume mounted. The container is created up front by
//! `Lifecycle::new_phase` and must be released with `cleanup`; dropping
//! an uncleaned phase removes the container in the background.

use crate::cancel::Cancellation;
use crate::credentials::{scoped_auth_env, CredentialProvider, REGISTRY_AUTH_ENV};
use crate::error::{PackError, PackResult};
use crate::lifecycle::descriptors::LAUNCH_DIR;
use crate::logging::LogSink;
use crate::orchestration::{ContainerConfig, ContainerRuntime};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The six lifecycle stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseName {
    Detect,
    Restore,
    Analyze,
    Build,
    Export,
    Cache,
}

impl PhaseName {
    /// All phases in execution order
    pub const ALL: [PhaseName; 6] = [
        PhaseName::Detect,
        PhaseName::Restore,
        PhaseName::Analyze,
        PhaseName::Build,
        PhaseName::Export,
        PhaseName::Cache,
    ];

    /// Lifecycle binary implementing the phase
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Detect => "detector",
            Self::Restore => "restorer",
            Self::Analyze => "analyzer",
            Self::Build => "builder",
            Self::Export => "exporter",
            Self::Cache => "cacher",
        }
    }

    /// Upper-case step header shown while the phase runs
    pub fn step(&self) -> &'static str {
        match self {
            Self::Detect => "DETECTING",
            Self::Restore => "RESTORING",
            Self::Analyze => "ANALYZING",
            Self::Build => "BUILDING",
            Self::Export => "EXPORTING",
            Self::Cache => "CACHING",
        }
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detect => "detect",
            Self::Restore => "restore",
            Self::Analyze => "analyze",
            Self::Build => "build",
            Self::Export => "export",
            Self::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// What outside image access a phase gets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Workspace only
    #[default]
    None,
    /// Engine control socket bound in; runs as root to use it
    Daemon,
    /// Registry credentials for exactly these two images
    Registry { repo_name: String, run_image: String },
}

/// Container settings for a phase, before creation
pub(crate) struct PhaseContainer {
    pub image: String,
    pub workspace_volume: String,
    pub lifecycle_dir: String,
    pub extra_volumes: Vec<String>,
}

impl PhaseContainer {
    /// Build the container config and command for a phase
    pub fn config(
        &self,
        name: PhaseName,
        args: &[String],
        access: &AccessMode,
        runtime: &dyn ContainerRuntime,
        credentials: &dyn CredentialProvider,
    ) -> PackResult<(ContainerConfig, Vec<String>)> {
        let mut config = ContainerConfig::new(&self.image)
            .with_volume(format!("{}:{}", self.workspace_volume, LAUNCH_DIR))
            .with_label("author", "pack");
        for volume in &self.extra_volumes {
            config = config.with_volume(volume.clone());
        }

        match access {
            AccessMode::None => {}
            AccessMode::Daemon => {
                let socket = runtime.daemon_socket();
                config = config
                    .with_user("root")
                    .with_volume(format!("{}:{}", socket, socket));
            }
            AccessMode::Registry {
                repo_name,
                run_image,
            } => {
                let auth = scoped_auth_env(credentials, &[repo_name.as_str(), run_image.as_str()])?;
                config.env.insert(REGISTRY_AUTH_ENV.to_string(), auth);
            }
        }

        let mut command = vec![format!(
            "{}/{}",
            self.lifecycle_dir.trim_end_matches('/'),
            name.binary()
        )];
        command.extend(args.iter().cloned());

        Ok((config, command))
    }
}

/// One created phase container
pub struct Phase {
    name: PhaseName,
    runtime: Arc<dyn ContainerRuntime>,
    sink: Arc<dyn LogSink>,
    container_id: Option<String>,
}

impl Phase {
    pub(crate) fn new(
        name: PhaseName,
        runtime: Arc<dyn ContainerRuntime>,
        sink: Arc<dyn LogSink>,
        container_id: String,
    ) -> Self {
        Self {
            name,
            runtime,
            sink,
            container_id: Some(container_id),
        }
    }

    pub fn name(&self) -> PhaseName {
        self.name
    }

    /// Container backing this phase, until cleanup
    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Start the container, stream its output and wait for it to exit
    ///
    /// A non-zero exit is a `PhaseExecution` error carrying the code.
    /// Cancellation kills the container and returns `PhaseCancelled`.
    pub async fn run(&self, cancel: &Cancellation) -> PackResult<()> {
        let container_id = self.container_id.as_deref().ok_or_else(|| {
            PackError::Internal(format!("{} phase already cleaned up", self.name))
        })?;

        if cancel.is_cancelled() {
            return Err(PackError::PhaseCancelled {
                phase: self.name.to_string(),
            });
        }

        debug!("Running {} phase in {}", self.name, container_id);
        let sink = Arc::clone(&self.sink);
        let on_output = move |stream, line: String| sink.write(stream, &line);

        let code = tokio::select! {
            code = self.runtime.start_attached(container_id, &on_output) => code?,
            _ = cancel.cancelled() => {
                info!("Cancelling {} phase", self.name);
                if let Err(e) = self.runtime.kill(container_id).await {
                    debug!("Kill of {} container failed: {}", self.name, e);
                }
                return Err(PackError::PhaseCancelled { phase: self.name.to_string() });
            }
        };

        if code != 0 {
            return Err(PackError::PhaseExecution {
                phase: self.name.to_string(),
                code,
            });
        }
        Ok(())
    }

    /// Remove the container; safe to repeat and safe after a failed run
    pub async fn cleanup(&mut self) {
        if let Some(container_id) = self.container_id.take() {
            if let Err(e) = self.runtime.remove(&container_id).await {
                warn!(
                    "Failed to remove {} container {}: {}",
                    self.name, container_id, e
                );
            }
        }
    }
}

impl Drop for Phase {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        warn!(
            "{} container {} was not cleaned up, removing in background",
            self.name, container_id
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let runtime = Arc::clone(&self.runtime);
                handle.spawn(async move {
                    if let Err(e) = runtime.remove(&container_id).await {
                        warn!("Background removal of {} failed: {}", container_id, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available, container {} leaked", container_id),
        }
    }
}
