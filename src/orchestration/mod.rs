//! Container engine access
//!
//! Provides the engine-agnostic runtime interface used by the build
//! pipeline, plus the CLI-backed implementation:
//! - Docker (`docker` CLI, `/var/run/docker.sock`)
//! - Podman (`podman` CLI, `/run/podman/podman.sock`)

mod container;
mod engine;
mod factory;
mod runtime;

pub use container::{ContainerConfig, ImageInfo, OutputStream};
pub(crate) use container::null_as_default;
pub use engine::{CliRuntime, Engine};
pub use factory::create_runtime;
pub use runtime::ContainerRuntime;

use crate::error::{PackError, PackResult};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in command error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Extract the useful tail of command output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn error_output_tail(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > ERROR_TAIL_LINES {
        lines[total - ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns the number of lines seen. This is a standalone async function
/// (not behind `async_trait`) to avoid lifetime issues with the `dyn Fn`
/// callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: &(dyn Fn(OutputStream, String) + Send + Sync),
) -> PackResult<usize> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(PackError::Internal(
            "child process output was not piped".to_string(),
        ));
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut seen = 0;
    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(OutputStream::Stderr, line);
                        seen += 1;
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        on_output(OutputStream::Stdout, line);
                        seen += 1;
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    Ok(seen)
}
