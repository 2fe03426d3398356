//! Configuration schema for pack
//!
//! Configuration is stored at `~/.config/pack/config.toml`

use crate::image::ImageRef;
use crate::orchestration::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default builder image when neither `--builder` nor `[build]` names one
pub const DEFAULT_BUILDER: &str = "packs/samples:rc";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Container engine settings
    pub engine: EngineConfig,

    /// Build defaults
    pub build: BuildDefaults,

    /// Cache settings
    pub cache: CacheConfig,

    /// Locally configured run-image mirrors
    pub run_images: Vec<RunImageConfig>,
}

impl Config {
    /// Locally configured mirrors for a run image
    ///
    /// Matches on the canonical reference, so `ubuntu` and
    /// `index.docker.io/library/ubuntu:latest` name the same entry.
    pub fn get_run_image(&self, image: &str) -> Option<&RunImageConfig> {
        let wanted = ImageRef::parse(image).ok()?.canonical();
        self.run_images.iter().find(|entry| {
            ImageRef::parse(&entry.image)
                .map(|r| r.canonical() == wanted)
                .unwrap_or(false)
        })
    }

    /// Replace (or add) the mirror list for a run image
    pub fn set_run_image_mirrors(&mut self, image: &str, mirrors: Vec<String>) {
        match self.run_images.iter_mut().find(|entry| entry.image == image) {
            Some(entry) => entry.mirrors = mirrors,
            None => self.run_images.push(RunImageConfig {
                image: image.to_string(),
                mirrors,
            }),
        }
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Enable verbose logging
    pub verbose: bool,

    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            log_format: "text".to_string(),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI to drive
    pub kind: Engine,

    /// Control socket to bind into daemon-access phases
    pub socket: Option<String>,

    /// Directory holding the engine's `config.json` with registry auths
    /// (defaults to `~/.docker`)
    pub docker_config_dir: Option<PathBuf>,
}

/// Build defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildDefaults {
    /// Builder image used when `--builder` is not given
    pub default_builder: String,

    /// Directory of the phase binaries inside the builder image
    pub lifecycle_dir: String,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            default_builder: DEFAULT_BUILDER.to_string(),
            lifecycle_dir: "/lifecycle".to_string(),
        }
    }
}

/// Where build caches are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// A local image written and read by the restorer/cacher
    #[default]
    Image,
    /// A named volume mounted into the restorer/cacher
    Volume,
}

/// Cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage backend
    pub backend: CacheBackend,
}

/// Mirrors for one run image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunImageConfig {
    /// Run image reference as declared by builders
    pub image: String,

    /// Registry-specific copies, tried before the builder's own list
    pub mirrors: Vec<String>,
}
