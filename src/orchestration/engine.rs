//! CLI-backed container runtime
//!
//! Implements the ContainerRuntime trait by executing the `docker` or
//! `podman` binary directly. Both CLIs accept the same arguments for every
//! operation used here.

use crate::error::{PackError, PackResult};
use crate::orchestration::container::{ContainerConfig, ImageInfo, OutputStream};
use crate::orchestration::runtime::ContainerRuntime;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Supported container engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Docker,
    Podman,
}

impl Engine {
    /// Executable name
    pub fn binary(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }

    /// Default control socket path
    pub fn default_socket(&self) -> &'static str {
        match self {
            Self::Docker => "/var/run/docker.sock",
            Self::Podman => "/run/podman/podman.sock",
        }
    }

    /// Whether engine stderr says the object does not exist
    fn is_not_found(stderr: &str) -> bool {
        let stderr = stderr.to_lowercase();
        stderr.contains("no such")
            || stderr.contains("not known")
            || stderr.contains("not found")
            || stderr.contains("manifest unknown")
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.binary())
    }
}

/// Container runtime driving the engine's command-line client
pub struct CliRuntime {
    engine: Engine,
    socket: String,
}

impl CliRuntime {
    /// Create a runtime for `engine` using its default socket
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            socket: engine.default_socket().to_string(),
        }
    }

    /// Override the control socket bind-mounted into daemon-access phases
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = socket.into();
        self
    }

    /// Engine this runtime drives
    pub fn engine(&self) -> Engine {
        self.engine
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> PackResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.engine, args);

        Command::new(self.engine.binary())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| PackError::command_failed(format!("{} {:?}", self.engine, args), e))
    }

    /// Execute an engine command that must succeed
    async fn exec_ok(&self, args: &[&str]) -> PackResult<std::process::Output> {
        let output = self.exec(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::command_exec(
                format!("{} {}", self.engine, args.first().copied().unwrap_or_default()),
                super::error_output_tail(&stdout, &stderr),
            ))
        }
    }

    /// Build the `create` argument list for a container
    fn create_args(config: &ContainerConfig, command: &[String]) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(ref user) = config.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        if let Some(ref workdir) = config.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }
        if let Some(ref network) = config.network {
            args.push("--network".to_string());
            args.push(network.clone());
        }

        for v in &config.volumes {
            args.push("-v".to_string());
            args.push(v.clone());
        }

        // Sorted so the command line is stable in logs
        let mut env: Vec<_> = config.env.iter().collect();
        env.sort();
        for (k, v) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        let mut labels: Vec<_> = config.labels.iter().collect();
        labels.sort();
        for (k, v) in labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(config.image.clone());
        args.extend(command.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn ensure_ready(&self) -> PackResult<()> {
        let installed = Command::new(self.engine.binary())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        if !installed {
            return Err(PackError::EngineNotFound(self.engine.to_string()));
        }

        self.exec_ok(&["info", "--format", "{{json .}}"]).await?;
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig, command: &[String]) -> PackResult<String> {
        let args = Self::create_args(config, command);
        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.exec(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!(
                "Container created: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::ContainerStart(stderr.trim().to_string()))
        }
    }

    async fn start_attached(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(OutputStream, String) + Send + Sync),
    ) -> PackResult<i32> {
        debug!("Starting container attached: {}", container_id);

        let mut child = Command::new(self.engine.binary())
            .args(["start", "--attach", container_id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PackError::command_failed(format!("{} start", self.engine), e))?;

        super::stream_child_output(&mut child, on_output).await?;

        let status = child
            .wait()
            .await
            .map_err(|e| PackError::command_failed(format!("{} start", self.engine), e))?;

        // `start --attach` exits with the container's exit code
        status.code().ok_or_else(|| {
            PackError::Internal(format!("container {} terminated by signal", container_id))
        })
    }

    async fn kill(&self, container_id: &str) -> PackResult<()> {
        debug!("Killing container: {}", container_id);

        let output = self.exec(&["kill", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::command_exec(format!("{} kill", self.engine), stderr))
        }
    }

    async fn remove(&self, container_id: &str) -> PackResult<()> {
        debug!("Removing container: {}", container_id);

        let output = self.exec(&["rm", "-f", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Engine::is_not_found(&stderr) {
                Ok(())
            } else {
                Err(PackError::command_exec(format!("{} rm", self.engine), stderr))
            }
        }
    }

    async fn copy_into(&self, container_id: &str, src: &Path, dest: &str) -> PackResult<()> {
        // A trailing "/." copies directory contents rather than the directory
        let source = if src.is_dir() {
            format!("{}/.", src.display())
        } else {
            src.display().to_string()
        };
        let target = format!("{}:{}", container_id, dest);
        debug!("Copying {} -> {}", source, target);

        self.exec_ok(&["cp", &source, &target]).await?;
        Ok(())
    }

    async fn copy_from(&self, container_id: &str, src: &str, dest: &Path) -> PackResult<()> {
        let source = format!("{}:{}", container_id, src);
        let target = dest.display().to_string();
        debug!("Copying {} -> {}", source, target);

        self.exec_ok(&["cp", &source, &target]).await?;
        Ok(())
    }

    async fn commit(&self, container_id: &str, tag: &str) -> PackResult<()> {
        debug!("Committing container {} as {}", container_id, tag);
        self.exec_ok(&["commit", container_id, tag]).await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> PackResult<bool> {
        let output = self.exec(&["image", "inspect", image]).await?;
        Ok(output.status.success())
    }

    async fn pull(&self, image: &str) -> PackResult<()> {
        info!("Pulling image: {}", image);

        let output = self.exec(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::ImagePull {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInfo>> {
        let output = self.exec(&["image", "inspect", image]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Engine::is_not_found(&stderr) {
                return Ok(None);
            }
            return Err(PackError::command_exec(
                format!("{} image inspect", self.engine),
                stderr,
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(ImageInfo::parse_inspect(&stdout)?)
    }

    async fn image_remove(&self, image: &str) -> PackResult<()> {
        let output = self.exec(&["rmi", "-f", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Engine::is_not_found(&stderr) {
                Ok(())
            } else {
                Err(PackError::command_exec(format!("{} rmi", self.engine), stderr))
            }
        }
    }

    async fn volume_create(&self, name: &str, labels: &HashMap<String, String>) -> PackResult<()> {
        debug!("Creating volume: {}", name);

        let mut args = vec!["volume", "create"];

        let label_strings: Vec<String> =
            labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        for label in &label_strings {
            args.push("--label");
            args.push(label);
        }

        args.push(name);

        let output = self.exec(&args).await?;

        if output.status.success() {
            debug!("Volume created: {}", name);
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(PackError::VolumeCreate {
                name: name.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn volume_exists(&self, name: &str) -> PackResult<bool> {
        let output = self.exec(&["volume", "inspect", name]).await?;
        Ok(output.status.success())
    }

    async fn volume_remove(&self, name: &str) -> PackResult<()> {
        debug!("Removing volume: {}", name);

        let output = self.exec(&["volume", "rm", "-f", name]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if Engine::is_not_found(&stderr) {
                Ok(())
            } else {
                Err(PackError::command_exec(
                    format!("{} volume rm", self.engine),
                    stderr,
                ))
            }
        }
    }

    fn daemon_socket(&self) -> &str {
        &self.socket
    }

    fn runtime_name(&self) -> &'static str {
        match self.engine {
            Engine::Docker => "Docker",
            Engine::Podman => "Podman",
        }
    }
}
