//! App image metadata
//!
//! The exporter writes this record as the `io.buildpacks.lifecycle.metadata`
//! label; the next build's analyzer reads it back verbatim.

use crate::error::{PackError, PackResult};
use crate::metadata::APP_METADATA_LABEL;
use crate::orchestration::{null_as_default, ImageInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content digest of a single image component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestRef {
    pub sha: String,
}

/// Run image the app was exported onto
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunImageRef {
    pub top_layer: String,
    pub sha: String,
}

/// One buildpack-contributed layer
///
/// `data` belongs to the buildpack. It is carried through untouched and
/// never interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerMetadata {
    pub sha: String,
    #[serde(deserialize_with = "null_as_default")]
    pub data: BTreeMap<String, serde_json::Value>,
    pub build: bool,
    pub launch: bool,
    pub cache: bool,
}

/// Layers contributed by one buildpack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildpackLayers {
    #[serde(rename = "key", alias = "id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub layers: BTreeMap<String, LayerMetadata>,
}

/// Everything the exporter records about an app image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppImageMetadata {
    pub app: DigestRef,
    pub config: DigestRef,
    pub run_image: RunImageRef,
    pub buildpacks: Vec<BuildpackLayers>,
}

impl AppImageMetadata {
    /// Parse the label value
    pub fn from_label(value: &str) -> PackResult<Self> {
        serde_json::from_str(value).map_err(|e| PackError::MetadataMalformed {
            label: APP_METADATA_LABEL.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read the record from an inspected image; `None` when unlabelled
    pub fn from_image(info: &ImageInfo) -> PackResult<Option<Self>> {
        info.label(APP_METADATA_LABEL)
            .map(Self::from_label)
            .transpose()
    }

    /// Serialize as a label value
    pub fn to_label(&self) -> PackResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a layer by buildpack id and layer name
    pub fn layer(&self, buildpack: &str, name: &str) -> Option<&LayerMetadata> {
        self.buildpacks
            .iter()
            .find(|bp| bp.id == buildpack)
            .and_then(|bp| bp.layers.get(name))
    }

    /// Total number of recorded layers
    pub fn layer_count(&self) -> usize {
        self.buildpacks.iter().map(|bp| bp.layers.len()).sum()
    }
}
