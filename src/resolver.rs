//! Run image resolution
//!
//! Picks the run image for a build and gates the build on stack
//! compatibility between builder and run image.

use crate::config::Config;
use crate::error::{PackError, PackResult};
use crate::image::{image_by_registry, registry};
use crate::metadata::{BuilderImageMetadata, STACK_LABEL};
use crate::orchestration::{ContainerRuntime, ImageInfo};
use tracing::{debug, info, warn};

/// Outcome of selecting a run image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunImageSelection {
    /// Reference to export onto
    pub image: String,
    /// True for a user override or a mirror from the local config.
    /// Such images are not recorded in the run-image label.
    pub locally_configured: bool,
}

/// A selected run image that exists and matches the builder's stack
#[derive(Debug, Clone)]
pub struct ResolvedRunImage {
    pub image: String,
    pub locally_configured: bool,
    pub stack: String,
    pub info: ImageInfo,
}

/// Choose among builder-declared and locally configured run images
///
/// Candidates are the local mirrors, then the builder default, then the
/// builder's mirrors. The first one hosted on `target_registry` wins,
/// otherwise the builder default is used.
pub fn select_run_image(
    builder: &BuilderImageMetadata,
    local_mirrors: &[String],
    target_registry: &str,
) -> PackResult<RunImageSelection> {
    let default = &builder.run_image.image;

    let mut candidates: Vec<String> = local_mirrors.to_vec();
    candidates.push(default.clone());
    candidates.extend(builder.run_image.mirrors.iter().cloned());

    match image_by_registry(target_registry, &candidates)? {
        Some(image) => {
            let locally_configured = local_mirrors.contains(&image);
            Ok(RunImageSelection {
                image,
                locally_configured,
            })
        }
        None => Ok(RunImageSelection {
            image: default.clone(),
            locally_configured: false,
        }),
    }
}

/// Stack id declared by an image
pub fn stack_id(image: &str, info: &ImageInfo) -> PackResult<String> {
    info.label(STACK_LABEL)
        .map(str::to_string)
        .ok_or_else(|| PackError::MissingStackLabel {
            image: image.to_string(),
        })
}

/// Resolves and validates the run image against a builder
pub struct RunImageResolver<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a Config,
}

impl<'a> RunImageResolver<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a Config) -> Self {
        Self { runtime, config }
    }

    /// Pick the run image reference for `repo_name`
    ///
    /// A non-empty `user_override` is used verbatim.
    pub fn select(
        &self,
        builder: &str,
        builder_info: &ImageInfo,
        user_override: Option<&str>,
        repo_name: &str,
    ) -> PackResult<RunImageSelection> {
        if let Some(image) = user_override.filter(|i| !i.is_empty()) {
            info!("Using user-provided run image {}", image);
            return Ok(RunImageSelection {
                image: image.to_string(),
                locally_configured: true,
            });
        }

        let metadata = BuilderImageMetadata::from_image(builder, builder_info)?;
        let target = registry(repo_name)?;
        let local_mirrors = self
            .config
            .get_run_image(&metadata.run_image.image)
            .map(|entry| entry.mirrors.clone())
            .unwrap_or_default();

        let selection = select_run_image(&metadata, &local_mirrors, &target)?;
        info!(
            "Selected run image {} from builder {}",
            selection.image, builder
        );
        Ok(selection)
    }

    /// Fetch the selected run image and check its stack against the builder
    ///
    /// Publishing builds require the image in its registry; daemon builds
    /// require it locally (pulled first unless `pull` is false).
    pub async fn validate(
        &self,
        selection: RunImageSelection,
        builder_stack: &str,
        builder: &str,
        publish: bool,
        pull: bool,
    ) -> PackResult<ResolvedRunImage> {
        let image = selection.image;
        let not_found = || PackError::RunImageNotFound {
            image: image.clone(),
            remote: publish,
        };

        if publish {
            debug!("Fetching remote run image {}", image);
            self.runtime.pull(&image).await.map_err(|e| {
                debug!("Remote lookup of {} failed: {}", image, e);
                not_found()
            })?;
        } else if pull {
            info!("Pulling run image {} (use --no-pull to skip)", image);
            if let Err(e) = self.runtime.pull(&image).await {
                if !self.runtime.image_exists(&image).await? {
                    debug!("Pull of {} failed: {}", image, e);
                    return Err(not_found());
                }
                warn!("Could not pull {}, using local copy: {}", image, e);
            }
        }

        let info = self.runtime.image_inspect(&image).await?.ok_or_else(not_found)?;
        let stack = stack_id(&image, &info)?;

        if stack != builder_stack {
            return Err(PackError::StackMismatch {
                run_stack: stack,
                run_image: image,
                builder_stack: builder_stack.to_string(),
                builder_image: builder.to_string(),
            });
        }

        Ok(ResolvedRunImage {
            image,
            locally_configured: selection.locally_configured,
            stack,
            info,
        })
    }
}
