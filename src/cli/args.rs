//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Pack - build app images from source with buildpacks
///
/// Runs the buildpack lifecycle (detect, restore, analyze, build, export,
/// cache) in containers against a builder image.
#[derive(Parser, Debug)]
#[command(name = "pack")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PACK_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an app image from source
    Build(BuildArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Name of the image to build
    pub repo_name: String,

    /// Path to the app directory (defaults to the current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Builder image (defaults to the configured default builder)
    #[arg(long)]
    pub builder: Option<String>,

    /// Run image, overriding the builder's choice
    #[arg(long)]
    pub run_image: Option<String>,

    /// Build-time environment variables, one KEY=VALUE per line
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Push to the registry instead of exporting to the local engine
    #[arg(long)]
    pub publish: bool,

    /// Skip pulling builder and run images before use
    #[arg(long)]
    pub no_pull: bool,

    /// Clear the build cache before detection
    #[arg(long)]
    pub clear_cache: bool,

    /// Buildpack to use: a directory, or id[@version] from the builder
    #[arg(short, long = "buildpack", value_name = "BUILDPACK")]
    pub buildpacks: Vec<String>,

    /// Hide phase output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., build.default_builder)
        key: String,
        /// Value to set
        value: String,
    },

    /// Set the builder used when --builder is not given
    SetDefaultBuilder {
        /// Builder image
        builder: String,
    },

    /// Configure local mirrors for a run image
    SetRunImageMirrors {
        /// Run image the mirrors stand in for
        run_image: String,
        /// Mirror image (repeatable)
        #[arg(short, long = "mirror", value_name = "MIRROR")]
        mirrors: Vec<String>,
    },
}
