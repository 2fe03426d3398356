//! Layer reuse tracking across builds
//!
//! Every layer starts `Unknown` when analysis begins, is either `Reused`
//! (digest unchanged since the previous image) or `Rebuilt`, is `Recorded`
//! once its digest and data are captured, and ends `Exported` when the new
//! image's label is written.

use crate::error::{PackError, PackResult};
use crate::metadata::AppImageMetadata;
use std::fmt;

/// Where a layer is in the reuse state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Unknown,
    Reused,
    Rebuilt,
    Recorded,
    Exported,
}

impl LayerState {
    /// Move to `next`, rejecting transitions the pipeline never makes
    pub fn advance(self, next: LayerState) -> PackResult<LayerState> {
        use LayerState::*;
        let allowed = matches!(
            (self, next),
            (Unknown, Reused) | (Unknown, Rebuilt) | (Reused, Recorded) | (Rebuilt, Recorded)
                | (Recorded, Exported)
        );
        if allowed {
            Ok(next)
        } else {
            Err(PackError::Internal(format!(
                "invalid layer transition {} -> {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for LayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Reused => "reused",
            Self::Rebuilt => "rebuilt",
            Self::Recorded => "recorded",
            Self::Exported => "exported",
        };
        f.write_str(name)
    }
}

/// Outcome for one exported layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerReport {
    pub buildpack: String,
    pub layer: String,
    pub sha: String,
    /// Whether the digest matched the previous image
    pub reused: bool,
    pub state: LayerState,
}

/// Per-layer comparison of a freshly exported image against its predecessor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub layers: Vec<LayerReport>,
}

impl ExportReport {
    /// Classify every layer of `exported` against `previous`
    ///
    /// With no previous metadata every layer counts as rebuilt.
    pub fn classify(
        previous: Option<&AppImageMetadata>,
        exported: &AppImageMetadata,
    ) -> PackResult<Self> {
        let mut layers = Vec::with_capacity(exported.layer_count());

        for bp in &exported.buildpacks {
            for (name, layer) in &bp.layers {
                let reused = previous
                    .and_then(|p| p.layer(&bp.id, name))
                    .map(|prev| !prev.sha.is_empty() && prev.sha == layer.sha)
                    .unwrap_or(false);

                let state = LayerState::Unknown
                    .advance(if reused {
                        LayerState::Reused
                    } else {
                        LayerState::Rebuilt
                    })?
                    .advance(LayerState::Recorded)?
                    .advance(LayerState::Exported)?;

                layers.push(LayerReport {
                    buildpack: bp.id.clone(),
                    layer: name.clone(),
                    sha: layer.sha.clone(),
                    reused,
                    state,
                });
            }
        }

        Ok(Self { layers })
    }

    /// Number of layers carried over unchanged
    pub fn reused(&self) -> usize {
        self.layers.iter().filter(|l| l.reused).count()
    }

    /// Number of layers produced by this build
    pub fn rebuilt(&self) -> usize {
        self.layers.len() - self.reused()
    }
}
