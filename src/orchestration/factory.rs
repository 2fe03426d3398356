//! Runtime factory
//!
//! Builds the container runtime selected by the `[engine]` config section.

use crate::config::Config;
use crate::orchestration::engine::CliRuntime;
use crate::orchestration::runtime::ContainerRuntime;
use std::sync::Arc;
use tracing::debug;

/// Create the container runtime described by `config`
///
/// The runtime is shared between the build factory, the lifecycle and
/// every phase of a build, hence the `Arc`.
pub fn create_runtime(config: &Config) -> Arc<dyn ContainerRuntime> {
    let engine = config.engine.kind;
    let mut runtime = CliRuntime::new(engine);
    if let Some(ref socket) = config.engine.socket {
        runtime = runtime.with_socket(socket.clone());
    }
    debug!(
        "Using {} runtime (socket {})",
        runtime.runtime_name(),
        runtime.daemon_socket()
    );
    Arc::new(runtime)
}
