//! Build pipeline
//!
//! `BuildFactory::build_config_from_flags` resolves and validates every
//! input (builder, run image, stack, buildpacks, env overlay, cache).
//! `BuildConfig::run` then drives the six phases in order against one
//! lifecycle:
//!
//! ```text
//! detect -> restore -> analyze -> chown -> build -> chown -> export -> cache
//! ```
//!
//! The first failing step aborts the rest; the workspace is released on
//! every path.

mod env;

pub use env::{parse_env, parse_env_file};

use crate::cache::{new_cache, Cache};
use crate::cancel::Cancellation;
use crate::config::Config;
use crate::credentials::CredentialProvider;
use crate::error::{PackError, PackResult, ResultExt};
use crate::lifecycle::{
    resolve_buildpacks, AccessMode, GroupDescriptor, Lifecycle, LifecycleConfig,
    LifecycleContext, PhaseName, BUILDPACKS_DIR, GROUP_PATH, LAUNCH_DIR, ORDER_PATH, PLAN_PATH,
    PLATFORM_DIR,
};
use crate::logging::LogSink;
use crate::metadata::{AppImageMetadata, BuilderImageMetadata, ExportReport};
use crate::orchestration::{ContainerRuntime, ImageInfo};
use crate::resolver::{stack_id, RunImageResolver};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Raw build inputs, as given on the command line
#[derive(Debug, Clone, Default)]
pub struct BuildFlags {
    pub app_dir: Option<PathBuf>,
    pub builder: Option<String>,
    pub run_image: Option<String>,
    pub env_file: Option<PathBuf>,
    pub repo_name: Option<String>,
    pub publish: bool,
    pub no_pull: bool,
    pub clear_cache: bool,
    pub buildpacks: Vec<String>,
}

/// Progress of one pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Started,
    Succeeded,
    Failed,
}

/// Receives phase progress, e.g. to drive a progress bar
pub trait PipelineObserver: Send + Sync {
    fn on_phase(&self, phase: PhaseName, event: PhaseEvent);
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_phase(&self, _phase: PhaseName, _event: PhaseEvent) {}
}

/// Default repository name for an app directory
///
/// An explicit name wins; otherwise `pack.local/run/<sha256 of the path>`.
pub fn repository_name(app_dir: &Path, repo_name: Option<&str>) -> String {
    match repo_name.filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => {
            let digest = Sha256::digest(app_dir.to_string_lossy().as_bytes());
            format!("pack.local/run/{}", hex::encode(digest))
        }
    }
}

/// Absolute app directory, defaulting to the working directory
pub fn resolve_app_dir(app_dir: Option<&Path>) -> PackResult<PathBuf> {
    let dir = match app_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| PackError::io("getting current directory", e))?;
            info!(
                "Defaulting app directory to current working directory {} (use --path to override)",
                cwd.display()
            );
            cwd
        }
    };
    let dir = std::path::absolute(&dir)
        .map_err(|e| PackError::io(format!("resolving {}", dir.display()), e))?;
    if !dir.is_dir() {
        return Err(PackError::User(format!(
            "app directory {} does not exist or is not a directory",
            dir.display()
        )));
    }
    Ok(dir)
}

/// Turns flags plus config into validated build configurations
pub struct BuildFactory {
    runtime: Arc<dyn ContainerRuntime>,
    config: Config,
    credentials: Arc<dyn CredentialProvider>,
    sink: Arc<dyn LogSink>,
}

impl BuildFactory {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: Config,
        credentials: Arc<dyn CredentialProvider>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            runtime,
            config,
            credentials,
            sink,
        }
    }

    /// Resolve flags into an immutable build configuration
    ///
    /// Fails before any phase can run if the builder or run image is
    /// unusable or their stacks differ.
    pub async fn build_config_from_flags(&self, flags: BuildFlags) -> PackResult<BuildConfig> {
        let app_dir = resolve_app_dir(flags.app_dir.as_deref())?;
        let repo_name = repository_name(&app_dir, flags.repo_name.as_deref());

        let env = match flags.env_file {
            Some(ref path) => parse_env_file(path).await?,
            None => BTreeMap::new(),
        };

        let builder = match flags.builder.filter(|b| !b.is_empty()) {
            Some(builder) => {
                info!("Using user-provided builder image {}", builder);
                builder
            }
            None => {
                info!(
                    "Using default builder image {}",
                    self.config.build.default_builder
                );
                self.config.build.default_builder.clone()
            }
        };

        let builder_info = self.fetch_builder(&builder, !flags.no_pull).await?;
        let builder_stack = stack_id(&builder, &builder_info).map_err(|e| {
            e.context(format!("invalid builder image {}", builder))
        })?;

        let resolver = RunImageResolver::new(self.runtime.as_ref(), &self.config);
        let selection = resolver.select(
            &builder,
            &builder_info,
            flags.run_image.as_deref(),
            &repo_name,
        )?;
        let run_image = resolver
            .validate(selection, &builder_stack, &builder, flags.publish, !flags.no_pull)
            .await?;
        debug!(
            "Run image {} on stack {} (digest {}, top layer {})",
            run_image.image,
            run_image.stack,
            run_image.info.digest().unwrap_or("unknown"),
            run_image.info.top_layer().unwrap_or("unknown")
        );

        let buildpacks = if flags.buildpacks.is_empty() {
            Vec::new()
        } else {
            // Directory buildpacks work even when the builder has no metadata label
            let builder_metadata =
                BuilderImageMetadata::from_image(&builder, &builder_info).unwrap_or_default();
            resolve_buildpacks(&flags.buildpacks, &builder_metadata, &builder_stack).await?
        };

        let cache = new_cache(
            self.config.cache.backend,
            &repo_name,
            Arc::clone(&self.runtime),
        );
        info!("Using cache {}", cache.image());

        Ok(BuildConfig {
            builder: builder.clone(),
            run_image: run_image.image,
            locally_configured_run_image: run_image.locally_configured,
            repo_name,
            publish: flags.publish,
            clear_cache: flags.clear_cache,
            cache,
            lifecycle_config: LifecycleConfig {
                builder_image: builder,
                app_dir,
                buildpacks,
                env,
                lifecycle_dir: self.config.build.lifecycle_dir.clone(),
            },
            ctx: LifecycleContext {
                runtime: Arc::clone(&self.runtime),
                credentials: Arc::clone(&self.credentials),
                sink: Arc::clone(&self.sink),
            },
            observer: Arc::new(NoopObserver),
        })
    }

    async fn fetch_builder(&self, builder: &str, pull: bool) -> PackResult<ImageInfo> {
        if pull {
            info!("Pulling builder image {} (use --no-pull to skip)", builder);
            self.runtime.pull(builder).await?;
        }
        self.runtime
            .image_inspect(builder)
            .await?
            .ok_or_else(|| PackError::ImageNotFound(builder.to_string()))
    }
}

/// What a successful build produced
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub repo_name: String,
    pub run_image: String,
    pub group: GroupDescriptor,
    /// Layer reuse against the previous image; daemon builds only
    pub report: Option<ExportReport>,
}

/// A validated, immutable build
pub struct BuildConfig {
    pub builder: String,
    pub run_image: String,
    /// User override or local mirror; suppresses the run-image label
    pub locally_configured_run_image: bool,
    pub repo_name: String,
    pub publish: bool,
    pub clear_cache: bool,
    pub cache: Arc<dyn Cache>,
    pub lifecycle_config: LifecycleConfig,
    pub ctx: LifecycleContext,
    pub observer: Arc<dyn PipelineObserver>,
}

impl BuildConfig {
    /// Replace the phase progress observer
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Provision a lifecycle for this build
    pub async fn new_lifecycle(&self, cancel: &Cancellation) -> PackResult<Lifecycle> {
        Lifecycle::new(self.lifecycle_config.clone(), self.ctx.clone(), cancel).await
    }

    /// Run all six phases, releasing the workspace however they end
    pub async fn run(&self, cancel: &Cancellation) -> PackResult<BuildOutcome> {
        let mut lifecycle = self.new_lifecycle(cancel).await?;
        debug!(
            "Running phases from {} on workspace {}",
            lifecycle.phase_image(),
            lifecycle.workspace_volume()
        );
        let result = self.run_phases(&lifecycle, cancel).await;
        lifecycle.cleanup().await;
        result
    }

    async fn run_phases(
        &self,
        lifecycle: &Lifecycle,
        cancel: &Cancellation,
    ) -> PackResult<BuildOutcome> {
        let group = self
            .observe(PhaseName::Detect, self.detect(lifecycle, cancel))
            .await?;
        self.observe(PhaseName::Restore, self.restore(lifecycle, cancel))
            .await?;
        let previous = self
            .observe(PhaseName::Analyze, self.analyze(lifecycle, cancel))
            .await?;
        self.observe(PhaseName::Build, self.build(lifecycle, cancel))
            .await?;
        let report = self
            .observe(
                PhaseName::Export,
                self.export(lifecycle, previous.as_ref(), cancel),
            )
            .await?;
        self.observe(PhaseName::Cache, self.cache(lifecycle, cancel))
            .await?;

        Ok(BuildOutcome {
            repo_name: self.repo_name.clone(),
            run_image: self.run_image.clone(),
            group,
            report,
        })
    }

    async fn observe<T>(
        &self,
        phase: PhaseName,
        step: impl std::future::Future<Output = PackResult<T>>,
    ) -> PackResult<T> {
        info!("{}", phase.step());
        self.observer.on_phase(phase, PhaseEvent::Started);
        let result = step.await;
        let event = if result.is_ok() {
            PhaseEvent::Succeeded
        } else {
            PhaseEvent::Failed
        };
        self.observer.on_phase(phase, event);
        result
    }

    /// Create, run and always remove one phase container
    async fn run_phase(
        &self,
        lifecycle: &Lifecycle,
        name: PhaseName,
        args: Vec<String>,
        access: AccessMode,
        volumes: Vec<String>,
        cancel: &Cancellation,
    ) -> PackResult<()> {
        let mut phase = lifecycle
            .new_phase_with_volumes(name, args, access, volumes)
            .await?;
        let result = phase.run(cancel).await;
        phase.cleanup().await;
        result.with_context(|| format!("run {} container", name))
    }

    fn daemon_or_registry(&self) -> AccessMode {
        if self.publish {
            AccessMode::Registry {
                repo_name: self.repo_name.clone(),
                run_image: self.run_image.clone(),
            }
        } else {
            AccessMode::Daemon
        }
    }

    fn cache_access(&self) -> AccessMode {
        if self.cache.needs_daemon() {
            AccessMode::Daemon
        } else {
            AccessMode::None
        }
    }

    /// Run the detector and return the group it selected
    ///
    /// Clears the cache first when requested; a failed clear means the
    /// detector never starts.
    pub async fn detect(
        &self,
        lifecycle: &Lifecycle,
        cancel: &Cancellation,
    ) -> PackResult<GroupDescriptor> {
        if self.clear_cache {
            self.cache.clear().await.context("clearing cache")?;
            info!("Cache {} cleared", self.cache.image());
        }

        let args = strings(&[
            "-buildpacks",
            BUILDPACKS_DIR,
            "-order",
            ORDER_PATH,
            "-group",
            GROUP_PATH,
            "-plan",
            PLAN_PATH,
        ]);
        self.run_phase(lifecycle, PhaseName::Detect, args, AccessMode::None, Vec::new(), cancel)
            .await?;

        let content = lifecycle
            .read_workspace_file(GROUP_PATH)
            .await
            .context("read detected group")?;
        let group = GroupDescriptor::parse(&content).context("parse detected group")?;
        for bp in &group.buildpacks {
            info!("Detected buildpack {}@{}", bp.id, bp.version);
        }
        Ok(group)
    }

    /// Restore cached layers into the workspace; an empty cache is fine
    pub async fn restore(&self, lifecycle: &Lifecycle, cancel: &Cancellation) -> PackResult<()> {
        self.cache.prepare().await?;
        self.run_phase(
            lifecycle,
            PhaseName::Restore,
            self.cache.phase_args(),
            self.cache_access(),
            self.cache.volumes(),
            cancel,
        )
        .await
    }

    /// Analyze the previous image, then hand the workspace to the builder
    /// identity
    ///
    /// Returns the previous image's metadata when it could be read
    /// locally. A malformed label is logged and treated as a first build.
    pub async fn analyze(
        &self,
        lifecycle: &Lifecycle,
        cancel: &Cancellation,
    ) -> PackResult<Option<AppImageMetadata>> {
        debug!("Reading information from previous image for possible re-use");
        let previous = if self.publish {
            None
        } else {
            self.read_image_metadata(&self.repo_name).await?
        };

        let mut args = strings(&["-layers", LAUNCH_DIR, "-group", GROUP_PATH]);
        if !self.publish {
            args.push("-daemon".to_string());
        }
        args.push(self.repo_name.clone());

        self.run_phase(
            lifecycle,
            PhaseName::Analyze,
            args,
            self.daemon_or_registry(),
            Vec::new(),
            cancel,
        )
        .await?;

        lifecycle
            .reconcile_ownership(LAUNCH_DIR, cancel)
            .await
            .context("chown launch dir")?;
        Ok(previous)
    }

    /// Run the buildpacks' build step
    pub async fn build(&self, lifecycle: &Lifecycle, cancel: &Cancellation) -> PackResult<()> {
        let args = strings(&[
            "-buildpacks",
            BUILDPACKS_DIR,
            "-layers",
            LAUNCH_DIR,
            "-group",
            GROUP_PATH,
            "-plan",
            PLAN_PATH,
            "-platform",
            PLATFORM_DIR,
        ]);
        self.run_phase(lifecycle, PhaseName::Build, args, AccessMode::None, Vec::new(), cancel)
            .await
    }

    /// Reconcile ownership of built layers, then export the app image
    ///
    /// Daemon builds read the new label back and compare it with
    /// `previous` to report which layers were reused.
    pub async fn export(
        &self,
        lifecycle: &Lifecycle,
        previous: Option<&AppImageMetadata>,
        cancel: &Cancellation,
    ) -> PackResult<Option<ExportReport>> {
        // Layers must belong to the build user before the exporter reads them
        lifecycle
            .reconcile_ownership(LAUNCH_DIR, cancel)
            .await
            .context("chown launch dir")?;

        let mut args = strings(&["-image", &self.run_image, "-layers", LAUNCH_DIR, "-group", GROUP_PATH]);
        if !self.locally_configured_run_image {
            args.push(format!("-run-image-label={}", self.run_image));
        }
        if !self.publish {
            args.push("-daemon".to_string());
        }
        args.push(self.repo_name.clone());

        self.run_phase(
            lifecycle,
            PhaseName::Export,
            args,
            self.daemon_or_registry(),
            Vec::new(),
            cancel,
        )
        .await?;

        if self.publish {
            return Ok(None);
        }

        let Some(exported) = self.read_image_metadata(&self.repo_name).await? else {
            warn!("Exported image {} carries no lifecycle metadata", self.repo_name);
            return Ok(None);
        };
        let report = ExportReport::classify(previous, &exported)?;
        info!(
            "Exported {}: {} layers reused, {} rebuilt",
            self.repo_name,
            report.reused(),
            report.rebuilt()
        );
        Ok(Some(report))
    }

    /// Persist fresh layers to the cache
    pub async fn cache(&self, lifecycle: &Lifecycle, cancel: &Cancellation) -> PackResult<()> {
        self.run_phase(
            lifecycle,
            PhaseName::Cache,
            self.cache.phase_args(),
            self.cache_access(),
            self.cache.volumes(),
            cancel,
        )
        .await
    }

    /// Lifecycle metadata of a local image
    ///
    /// Missing images and labels yield `None`, as does a malformed label
    /// (logged).
    async fn read_image_metadata(&self, image: &str) -> PackResult<Option<AppImageMetadata>> {
        let Some(info) = self.ctx.runtime.image_inspect(image).await? else {
            debug!("No previous image {}", image);
            return Ok(None);
        };
        match AppImageMetadata::from_image(&info) {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                warn!("Ignoring metadata on {}: {}", image, e);
                Ok(None)
            }
        }
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
