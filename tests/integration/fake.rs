//! In-memory container engine for pipeline tests

use async_trait::async_trait;
use pack::error::{PackError, PackResult};
use pack::metadata::{AppImageMetadata, APP_METADATA_LABEL, RUN_IMAGE_LABEL};
use pack::orchestration::{ContainerConfig, ContainerRuntime, ImageInfo, OutputStream};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub const SOCKET: &str = "/var/run/docker.sock";

/// A container as it was created
#[derive(Debug, Clone)]
pub struct Created {
    pub id: String,
    pub config: ContainerConfig,
    pub command: Vec<String>,
}

impl Created {
    /// `detector`, `chown`, `true`...
    pub fn program(&self) -> &str {
        program(&self.command)
    }
}

#[derive(Default)]
pub struct State {
    pub images: HashMap<String, ImageInfo>,
    pub volumes: HashSet<String>,
    pub created: Vec<Created>,
    pub live: HashSet<String>,
    pub started: Vec<String>,
    pub killed: Vec<String>,
    pub events: Vec<String>,
    pub exit_codes: HashMap<String, i32>,
    pub hang: HashSet<String>,
    pub files: HashMap<String, String>,
    /// Files copied into containers, by container path
    pub copied: BTreeMap<String, String>,
    pub exported: Option<AppImageMetadata>,
    pub fail_image_remove: bool,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_image(&self, name: &str, info: ImageInfo) {
        self.state().images.insert(name.to_string(), info);
    }

    /// Programs started, in order
    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    /// Lifecycle binaries started, in order
    pub fn phases(&self) -> Vec<String> {
        self.started()
            .into_iter()
            .filter(|p| p != "chown")
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    /// Containers created for a program
    pub fn created(&self, program: &str) -> Vec<Created> {
        self.state()
            .created
            .iter()
            .filter(|c| c.program() == program)
            .cloned()
            .collect()
    }

    pub fn live_containers(&self) -> usize {
        self.state().live.len()
    }

    pub fn volumes(&self) -> HashSet<String> {
        self.state().volumes.clone()
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.state().images.contains_key(name)
    }

    /// A label on a stored image
    pub fn image_label(&self, image: &str, label: &str) -> Option<String> {
        self.state()
            .images
            .get(image)
            .and_then(|info| info.label(label))
            .map(str::to_string)
    }

    fn log(&self, event: String) {
        self.state().events.push(event);
    }
}

fn program(command: &[String]) -> &str {
    command
        .first()
        .and_then(|c| c.rsplit('/').next())
        .unwrap_or_default()
}

fn walk(dir: &Path, prefix: &str, out: &mut BTreeMap<String, String>) {
    for entry in std::fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
        if entry.file_type().unwrap().is_dir() {
            walk(&entry.path(), &name, out);
        } else {
            out.insert(name, std::fs::read_to_string(entry.path()).unwrap_or_default());
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_ready(&self) -> PackResult<()> {
        Ok(())
    }

    async fn create(&self, config: &ContainerConfig, command: &[String]) -> PackResult<String> {
        let mut state = self.state();
        if !state.images.contains_key(&config.image) {
            return Err(PackError::ContainerStart(format!("no such image {}", config.image)));
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.events.push(format!("create {}", program(command)));
        state.live.insert(id.clone());
        state.created.push(Created {
            id: id.clone(),
            config: config.clone(),
            command: command.to_vec(),
        });
        Ok(id)
    }

    async fn start_attached(
        &self,
        container_id: &str,
        on_output: &(dyn Fn(OutputStream, String) + Send + Sync),
    ) -> PackResult<i32> {
        let (created, code, hang) = {
            let mut state = self.state();
            let created = state
                .created
                .iter()
                .find(|c| c.id == container_id)
                .cloned()
                .ok_or_else(|| PackError::ContainerStart(container_id.to_string()))?;
            let program = created.program().to_string();
            state.started.push(program.clone());
            state.events.push(format!("start {}", program));
            let code = state.exit_codes.get(&program).copied().unwrap_or(0);
            let hang = state.hang.contains(&program);
            (created, code, hang)
        };

        on_output(OutputStream::Stdout, format!("{} running", created.program()));
        if hang {
            std::future::pending::<()>().await;
        }

        if code == 0 && created.program() == "exporter" {
            let mut state = self.state();
            if let Some(repo) = created.command.last() {
                let mut info = ImageInfo::default();
                if let Some(metadata) = &state.exported {
                    info.config
                        .labels
                        .insert(APP_METADATA_LABEL.to_string(), metadata.to_label()?);
                }
                if let Some(run_image) = created
                    .command
                    .iter()
                    .find_map(|a| a.strip_prefix("-run-image-label="))
                {
                    info.config
                        .labels
                        .insert(RUN_IMAGE_LABEL.to_string(), run_image.to_string());
                }
                state.images.insert(repo.clone(), info);
            }
        }
        if code != 0 {
            on_output(OutputStream::Stderr, format!("exit status {}", code));
        }
        Ok(code)
    }

    async fn kill(&self, container_id: &str) -> PackResult<()> {
        self.state().killed.push(container_id.to_string());
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> PackResult<()> {
        let mut state = self.state();
        state.live.remove(container_id);
        state.events.push(format!("remove {}", container_id));
        Ok(())
    }

    async fn copy_into(&self, _container_id: &str, src: &Path, dest: &str) -> PackResult<()> {
        let mut files = BTreeMap::new();
        if src.is_dir() {
            walk(src, dest, &mut files);
        }
        self.log(format!("copy {}", dest));
        self.state().copied.extend(files);
        Ok(())
    }

    async fn copy_from(&self, _container_id: &str, src: &str, dest: &Path) -> PackResult<()> {
        let content = self
            .state()
            .files
            .get(src)
            .cloned()
            .ok_or_else(|| PackError::command_exec("cp", format!("no such file {}", src)))?;
        std::fs::write(dest, content).map_err(|e| PackError::io("fake copy", e))
    }

    async fn commit(&self, container_id: &str, tag: &str) -> PackResult<()> {
        let mut state = self.state();
        let base = state
            .created
            .iter()
            .find(|c| c.id == container_id)
            .map(|c| c.config.image.clone())
            .unwrap_or_default();
        let info = state.images.get(&base).cloned().unwrap_or_default();
        state.images.insert(tag.to_string(), info);
        state.events.push(format!("commit {}", tag));
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> PackResult<bool> {
        Ok(self.has_image(image))
    }

    async fn pull(&self, image: &str) -> PackResult<()> {
        if self.has_image(image) {
            Ok(())
        } else {
            Err(PackError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            })
        }
    }

    async fn image_inspect(&self, image: &str) -> PackResult<Option<ImageInfo>> {
        Ok(self.state().images.get(image).cloned())
    }

    async fn image_remove(&self, image: &str) -> PackResult<()> {
        let mut state = self.state();
        if state.fail_image_remove {
            return Err(PackError::command_exec("rmi", "image is in use"));
        }
        state.images.remove(image);
        state.events.push(format!("image_remove {}", image));
        Ok(())
    }

    async fn volume_create(&self, name: &str, _labels: &HashMap<String, String>) -> PackResult<()> {
        let mut state = self.state();
        state.volumes.insert(name.to_string());
        state.events.push(format!("volume_create {}", name));
        Ok(())
    }

    async fn volume_exists(&self, name: &str) -> PackResult<bool> {
        Ok(self.state().volumes.contains(name))
    }

    async fn volume_remove(&self, name: &str) -> PackResult<()> {
        let mut state = self.state();
        state.volumes.remove(name);
        state.events.push(format!("volume_remove {}", name));
        Ok(())
    }

    fn daemon_socket(&self) -> &str {
        SOCKET
    }

    fn runtime_name(&self) -> &'static str {
        "Fake"
    }
}
