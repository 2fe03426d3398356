//! Workspace descriptor files
//!
//! Phases talk to each other through TOML documents at fixed paths:
//! the order the detector tries and the group it settled on.

use crate::error::PackResult;
use serde::{Deserialize, Serialize};

/// Launch directory, also the workspace volume mount point
pub const LAUNCH_DIR: &str = "/workspace";
/// Where the app source is copied
pub const APP_DIR: &str = "/workspace/app";
/// Buildpacks inside the builder image
pub const BUILDPACKS_DIR: &str = "/buildpacks";
/// Platform directory holding `env/<VAR>` files
pub const PLATFORM_DIR: &str = "/platform";
/// Buildpack order tried by the detector
pub const ORDER_PATH: &str = "/buildpacks/order.toml";
/// Group written by the detector
pub const GROUP_PATH: &str = "/workspace/group.toml";
/// Build plan written by the detector
pub const PLAN_PATH: &str = "/workspace/plan.toml";

/// A buildpack by id and version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackRef {
    pub id: String,
    pub version: String,
}

/// One candidate group in `order.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderGroup {
    pub buildpacks: Vec<BuildpackRef>,
}

/// Contents of `order.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDescriptor {
    pub groups: Vec<OrderGroup>,
}

impl OrderDescriptor {
    /// An order with a single group trying `buildpacks` in sequence
    pub fn single_group(buildpacks: Vec<BuildpackRef>) -> Self {
        Self {
            groups: vec![OrderGroup { buildpacks }],
        }
    }

    pub fn to_toml(&self) -> PackResult<String> {
        Ok(toml::to_string(self)?)
    }
}

/// Contents of `group.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDescriptor {
    pub buildpacks: Vec<BuildpackRef>,
}

impl GroupDescriptor {
    pub fn parse(content: &str) -> PackResult<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Contents of `buildpack.toml` in a buildpack directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildpackDescriptor {
    pub buildpack: BuildpackInfo,
    #[serde(default)]
    pub stacks: Vec<StackRef>,
}

/// `[buildpack]` table of `buildpack.toml`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildpackInfo {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: String,
}

/// `[[stacks]]` entry of `buildpack.toml`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StackRef {
    pub id: String,
}

impl BuildpackDescriptor {
    pub fn parse(content: &str) -> PackResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Whether the buildpack declares `stack`
    pub fn supports_stack(&self, stack: &str) -> bool {
        self.stacks.iter().any(|s| s.id == stack)
    }

    pub fn to_ref(&self) -> BuildpackRef {
        BuildpackRef {
            id: self.buildpack.id.clone(),
            version: self.buildpack.version.clone(),
        }
    }
}
