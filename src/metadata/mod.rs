//! Image label metadata
//!
//! Labels are the only state that survives between builds: the builder
//! declares its stack and default run image, and every exported app image
//! records what it was built from so the next build can reuse layers.

mod app;
mod builder;
mod reuse;

pub use app::{AppImageMetadata, BuildpackLayers, DigestRef, LayerMetadata, RunImageRef};
pub use builder::{BuilderBuildpack, BuilderImageMetadata, BuilderRunImage};
pub use reuse::{ExportReport, LayerReport, LayerState};

/// Stack identity shared by compatible builder and run images
pub const STACK_LABEL: &str = "io.buildpacks.stack.id";

/// Builder-declared run image and bundled buildpacks
pub const BUILDER_METADATA_LABEL: &str = "io.buildpacks.pack.metadata";

/// Per-build record written by the exporter
pub const APP_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

/// Run image reference, set when the run image was not configured locally
pub const RUN_IMAGE_LABEL: &str = "io.buildpacks.run-image";
