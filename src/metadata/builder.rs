//! Builder image metadata

use crate::error::{PackError, PackResult};
use crate::metadata::BUILDER_METADATA_LABEL;
use crate::orchestration::ImageInfo;
use serde::{Deserialize, Serialize};

/// Builder-declared run image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderRunImage {
    pub image: String,
    pub mirrors: Vec<String>,
}

/// A buildpack bundled in the builder
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderBuildpack {
    pub id: String,
    pub version: String,
    pub latest: bool,
}

/// Contents of the `io.buildpacks.pack.metadata` builder label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuilderImageMetadata {
    pub run_image: BuilderRunImage,
    pub buildpacks: Vec<BuilderBuildpack>,
}

impl BuilderImageMetadata {
    /// Read the label from an inspected builder image
    pub fn from_image(builder: &str, info: &ImageInfo) -> PackResult<Self> {
        let label = info
            .label(BUILDER_METADATA_LABEL)
            .ok_or_else(|| PackError::BuilderMetadataMissing {
                image: builder.to_string(),
            })?;

        let metadata: Self =
            serde_json::from_str(label).map_err(|e| PackError::BuilderMetadataMalformed {
                image: builder.to_string(),
                reason: e.to_string(),
            })?;

        if metadata.run_image.image.is_empty() {
            return Err(PackError::BuilderMetadataMalformed {
                image: builder.to_string(),
                reason: "runImage.image is empty".to_string(),
            });
        }

        Ok(metadata)
    }

    /// Find a bundled buildpack; an empty or `latest` version matches the
    /// version the builder marks as latest
    pub fn find_buildpack(&self, id: &str, version: &str) -> Option<&BuilderBuildpack> {
        let want_latest = version.is_empty() || version == "latest";
        self.buildpacks
            .iter()
            .find(|bp| bp.id == id && (bp.version == version || (want_latest && bp.latest)))
    }
}
