//! Buildpack overrides and builder staging
//!
//! `--buildpack` entries replace the builder's own order. Local directories
//! and the env overlay are staged on the host, then copied into an
//! ephemeral image derived from the builder.

use crate::error::{PackError, PackResult};
use crate::lifecycle::descriptors::{BuildpackDescriptor, BuildpackRef, OrderDescriptor};
use crate::metadata::BuilderImageMetadata;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::debug;

/// Where a requested buildpack comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildpackSource {
    /// A local directory containing `buildpack.toml`
    Directory {
        path: PathBuf,
        descriptor: BuildpackDescriptor,
    },
    /// A buildpack already bundled in the builder
    Builder(BuildpackRef),
}

impl BuildpackSource {
    /// Id and version to list in the order
    pub fn buildpack_ref(&self) -> BuildpackRef {
        match self {
            Self::Directory { descriptor, .. } => descriptor.to_ref(),
            Self::Builder(r) => r.clone(),
        }
    }
}

/// Resolve `--buildpack` entries against the builder
///
/// Each entry is either a directory or `id[@version]`. Directory
/// buildpacks must declare the builder's stack.
pub async fn resolve_buildpacks(
    entries: &[String],
    builder: &BuilderImageMetadata,
    stack: &str,
) -> PackResult<Vec<BuildpackSource>> {
    let mut sources = Vec::with_capacity(entries.len());

    for entry in entries {
        let path = Path::new(entry);
        if path.is_dir() {
            let descriptor = read_descriptor(path).await?;
            if !descriptor.supports_stack(stack) {
                return Err(PackError::BuildpackStackUnsupported {
                    id: descriptor.buildpack.id,
                    stack: stack.to_string(),
                });
            }
            debug!(
                "Using directory buildpack {}@{}",
                descriptor.buildpack.id, descriptor.buildpack.version
            );
            sources.push(BuildpackSource::Directory {
                path: path.to_path_buf(),
                descriptor,
            });
            continue;
        }

        let (id, version) = entry.split_once('@').unwrap_or((entry.as_str(), "latest"));
        let found = builder
            .find_buildpack(id, version)
            .ok_or_else(|| PackError::BuildpackInvalid {
                path: PathBuf::from(entry),
                reason: format!("buildpack {}@{} not found in builder", id, version),
            })?;
        sources.push(BuildpackSource::Builder(BuildpackRef {
            id: found.id.clone(),
            version: found.version.clone(),
        }));
    }

    Ok(sources)
}

async fn read_descriptor(dir: &Path) -> PackResult<BuildpackDescriptor> {
    let invalid = |reason: String| PackError::BuildpackInvalid {
        path: dir.to_path_buf(),
        reason,
    };

    let content = fs::read_to_string(dir.join("buildpack.toml"))
        .await
        .map_err(|e| invalid(format!("reading buildpack.toml: {}", e)))?;
    let descriptor = BuildpackDescriptor::parse(&content).map_err(|e| invalid(e.to_string()))?;

    let info = &descriptor.buildpack;
    if !is_path_safe(&info.id, true) {
        return Err(invalid(format!("id {:?} is not a valid path component", info.id)));
    }
    if !is_path_safe(&info.version, false) {
        return Err(invalid(format!(
            "version {:?} is not a valid path component",
            info.version
        )));
    }
    Ok(descriptor)
}

/// Staged as `/buildpacks/<escaped id>/<version>`; neither part may leave that tree.
/// `/` is allowed in ids only, since `escape_id` rewrites it.
fn is_path_safe(value: &str, allow_slash: bool) -> bool {
    !value.is_empty()
        && value != "."
        && !value.contains("..")
        && !value.contains('\\')
        && (allow_slash || !value.contains('/'))
}

/// Directory name for a buildpack id inside `/buildpacks`
pub fn escape_id(id: &str) -> String {
    id.replace('/', "_")
}

/// Host-side copy of everything added on top of the builder
///
/// Layout mirrors the image: `buildpacks/` lands on `/buildpacks` and
/// `platform/` on `/platform`.
pub struct StagedContent {
    dir: TempDir,
}

impl StagedContent {
    /// Stage buildpack overrides and env overlay; `None` when both are empty
    pub async fn stage(
        buildpacks: &[BuildpackSource],
        env: &BTreeMap<String, String>,
    ) -> PackResult<Option<Self>> {
        if buildpacks.is_empty() && env.is_empty() {
            return Ok(None);
        }

        let dir = TempDir::new().map_err(|e| PackError::io("creating staging dir", e))?;
        let staged = Self { dir };

        if !buildpacks.is_empty() {
            staged.stage_buildpacks(buildpacks).await?;
        }
        if !env.is_empty() {
            staged.stage_env(env).await?;
        }

        Ok(Some(staged))
    }

    /// Staged `/buildpacks` content, if any
    pub fn buildpacks_dir(&self) -> Option<PathBuf> {
        let dir = self.dir.path().join("buildpacks");
        dir.exists().then_some(dir)
    }

    /// Staged `/platform` content, if any
    pub fn platform_dir(&self) -> Option<PathBuf> {
        let dir = self.dir.path().join("platform");
        dir.exists().then_some(dir)
    }

    async fn stage_buildpacks(&self, buildpacks: &[BuildpackSource]) -> PackResult<()> {
        let root = self.dir.path().join("buildpacks");
        fs::create_dir_all(&root)
            .await
            .map_err(|e| PackError::io("creating staged buildpacks dir", e))?;

        for source in buildpacks {
            if let BuildpackSource::Directory { path, descriptor } = source {
                let dest = root
                    .join(escape_id(&descriptor.buildpack.id))
                    .join(&descriptor.buildpack.version);
                copy_dir_all(path.clone(), dest).await?;
            }
        }

        let order =
            OrderDescriptor::single_group(buildpacks.iter().map(|b| b.buildpack_ref()).collect());
        fs::write(root.join("order.toml"), order.to_toml()?)
            .await
            .map_err(|e| PackError::io("writing order.toml", e))?;
        Ok(())
    }

    async fn stage_env(&self, env: &BTreeMap<String, String>) -> PackResult<()> {
        let env_dir = self.dir.path().join("platform").join("env");
        fs::create_dir_all(&env_dir)
            .await
            .map_err(|e| PackError::io("creating staged platform env dir", e))?;

        for (key, value) in env {
            if key.is_empty() || key.contains('/') || key.contains('\0') {
                return Err(PackError::User(format!(
                    "invalid environment variable name {:?}",
                    key
                )));
            }
            fs::write(env_dir.join(key), value)
                .await
                .map_err(|e| PackError::io(format!("writing platform env {}", key), e))?;
        }
        Ok(())
    }
}

/// Recursively copy `src` into `dest`, keeping file modes
async fn copy_dir_all(src: PathBuf, dest: PathBuf) -> PackResult<()> {
    let context = format!("copying {} to {}", src.display(), dest.display());
    tokio::task::spawn_blocking(move || copy_dir_blocking(&src, &dest))
        .await
        .map_err(|e| PackError::Internal(format!("copy task failed: {}", e)))?
        .map_err(|e| PackError::io(context, e))
}

fn copy_dir_blocking(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    std::fs::set_permissions(dest, std::fs::metadata(src)?.permissions())?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_blocking(&entry.path(), &target)?;
        } else {
            // std::fs::copy carries the permission bits over
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
