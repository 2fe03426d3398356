//! Pack - build app images from source with buildpacks
//!
//! Drives the buildpack lifecycle (detect, restore, analyze, build,
//! export, cache) as a sequence of containers on a local docker or
//! podman engine.

pub mod build;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod image;
pub mod lifecycle;
pub mod logging;
pub mod metadata;
pub mod orchestration;
pub mod resolver;
pub mod ui;

pub use error::{PackError, PackResult};
