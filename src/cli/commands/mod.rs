//! CLI command implementations

pub mod build;
pub mod config;

pub use build::execute as build;
pub use config::execute as config;
