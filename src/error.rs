//! Error types for pack
//!
//! All modules use `PackResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pack operations
pub type PackResult<T> = Result<T, PackError>;

/// Exit code returned by the detector when no buildpack group passed
pub const NO_BUILDPACK_GROUP_EXIT_CODE: i32 = 6;

/// Broad error category, used by callers to decide retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolution,
    Phase,
    Identity,
    Cache,
    Metadata,
    Environment,
    Internal,
}

/// All errors that can occur in pack
#[derive(Error, Debug)]
pub enum PackError {
    // Resolution errors (builder / run image / stack)
    #[error("invalid builder image {image}: missing required label io.buildpacks.pack.metadata -- try recreating builder")]
    BuilderMetadataMissing { image: String },

    #[error("invalid builder image metadata on {image}: {reason}")]
    BuilderMetadataMalformed { image: String, reason: String },

    #[error("invalid image {image}: missing required label io.buildpacks.stack.id")]
    MissingStackLabel { image: String },

    #[error("invalid stack: stack {run_stack} from run image {run_image} does not match stack {builder_stack} from builder image {builder_image}")]
    StackMismatch {
        run_stack: String,
        run_image: String,
        builder_stack: String,
        builder_image: String,
    },

    #[error("{} run image {image} does not exist", locality(.remote))]
    RunImageNotFound { image: String, remote: bool },

    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("invalid image reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    // Phase errors
    #[error("failed with status code: {code}")]
    PhaseExecution { phase: String, code: i32 },

    #[error("{phase} was cancelled")]
    PhaseCancelled { phase: String },

    // Identity errors
    #[error("builder image {image} does not declare {var}")]
    MissingIdentity { image: String, var: String },

    #[error("parsing {var}: {value:?} is not a numeric id")]
    MalformedIdentity { var: String, value: String },

    // Cache errors
    #[error("cache {name}: {reason}")]
    Cache { name: String, reason: String },

    // Metadata errors
    #[error("malformed {label} label: {reason}")]
    MetadataMalformed { label: String, reason: String },

    // Buildpack errors
    #[error("invalid buildpack {path}: {reason}")]
    BuildpackInvalid { path: PathBuf, reason: String },

    #[error("buildpack {id} does not support stack {stack}")]
    BuildpackStackUnsupported { id: String, stack: String },

    // Container engine errors
    #[error("{0} not found. Install it or set [engine] kind in the pack config")]
    EngineNotFound(String),

    #[error("Container failed to start: {0}")]
    ContainerStart(String),

    #[error("Image pull failed: {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Failed to create volume {name}: {reason}")]
    VolumeCreate { name: String, reason: String },

    // Credential errors
    #[error("Invalid registry credentials at {path}: {reason}")]
    CredentialsInvalid { path: PathBuf, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // Wrapping
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<PackError>,
    },

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn locality(remote: &bool) -> &'static str {
    if *remote {
        "remote"
    } else {
        "local"
    }
}

impl PackError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap this error with the operation that produced it
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &PackError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Exit code of the failed phase container, if this is a phase failure
    pub fn exit_code(&self) -> Option<i32> {
        match self.root() {
            Self::PhaseExecution { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Name of the failed phase, if this is a phase failure
    pub fn phase(&self) -> Option<&str> {
        match self.root() {
            Self::PhaseExecution { phase, .. } | Self::PhaseCancelled { phase } => Some(phase),
            _ => None,
        }
    }

    /// True when detection ran but no buildpack group matched the app
    pub fn is_no_buildpack_group(&self) -> bool {
        matches!(
            self.root(),
            Self::PhaseExecution { phase, code }
                if phase == "detect" && *code == NO_BUILDPACK_GROUP_EXIT_CODE
        )
    }

    /// Error category
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::BuilderMetadataMissing { .. }
            | Self::BuilderMetadataMalformed { .. }
            | Self::MissingStackLabel { .. }
            | Self::StackMismatch { .. }
            | Self::RunImageNotFound { .. }
            | Self::ImageNotFound(_)
            | Self::InvalidReference { .. }
            | Self::BuildpackInvalid { .. }
            | Self::BuildpackStackUnsupported { .. } => ErrorKind::Resolution,
            Self::PhaseExecution { .. } | Self::PhaseCancelled { .. } => ErrorKind::Phase,
            Self::MissingIdentity { .. } | Self::MalformedIdentity { .. } => ErrorKind::Identity,
            Self::Cache { .. } => ErrorKind::Cache,
            Self::MetadataMalformed { .. } => ErrorKind::Metadata,
            Self::EngineNotFound(_)
            | Self::ContainerStart(_)
            | Self::ImagePull { .. }
            | Self::VolumeCreate { .. }
            | Self::CredentialsInvalid { .. }
            | Self::ConfigInvalid { .. }
            | Self::ConfigDirCreate { .. }
            | Self::Io { .. }
            | Self::CommandFailed { .. }
            | Self::CommandExecution { .. } => ErrorKind::Environment,
            Self::Json(_)
            | Self::TomlParse(_)
            | Self::TomlSerialize(_)
            | Self::Context { .. }
            | Self::Internal(_)
            | Self::User(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying the whole build could succeed
    pub fn is_retryable(&self) -> bool {
        if self.is_no_buildpack_group() {
            return false;
        }
        matches!(
            self.root(),
            Self::PhaseExecution { .. }
                | Self::ContainerStart(_)
                | Self::ImagePull { .. }
                | Self::Cache { .. }
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        if self.is_no_buildpack_group() {
            return Some("No buildpack group passed detection. Check --path or pass --buildpack");
        }
        match self.root() {
            Self::StackMismatch { .. } => {
                Some("Pick a run image built for the builder's stack (--run-image)")
            }
            Self::BuilderMetadataMissing { .. } => Some("Recreate the builder image"),
            Self::MissingIdentity { .. } | Self::MalformedIdentity { .. } => {
                Some("The builder must set numeric PACK_USER_ID and PACK_GROUP_ID")
            }
            Self::EngineNotFound(_) => Some("Install docker or podman"),
            Self::RunImageNotFound { remote: true, .. } => {
                Some("Push the run image to the registry or drop --publish")
            }
            _ if self.is_retryable() => Some("This may be transient; run the build again"),
            _ => None,
        }
    }
}

/// Attach operation context to errors
pub trait ResultExt<T> {
    /// Wrap the error with a fixed context string
    fn context(self, context: impl Into<String>) -> PackResult<T>;

    /// Wrap the error with a lazily built context string
    fn with_context<F: FnOnce() -> String>(self, f: F) -> PackResult<T>;
}

impl<T> ResultExt<T> for PackResult<T> {
    fn context(self, context: impl Into<String>) -> PackResult<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> PackResult<T> {
        self.map_err(|e| e.context(f()))
    }
}
