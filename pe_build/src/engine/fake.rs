//! An in-memory [`ContainerEngine`] for tests.

use std::{
    cell::{Ref, RefCell},
    collections::{BTreeMap, BTreeSet},
    num::NonZeroI32,
    path::Path,
};

use pe_image_name::ImageName;

use super::{
    BuildArgs, ContainerEngine, ContainerHandle, CreateArgs, EngineError, ExecOutput, RunOptions,
};
use crate::process;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub options: RunOptions,
    pub running: bool,
}

#[derive(Debug, Clone)]
pub struct PushedFile {
    pub container: String,
    pub local: String,
    pub remote: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
struct Response {
    needle: String,
    exit_code: i32,
    lines: Vec<String>,
}

#[derive(Debug, Default)]
pub struct State {
    pub unreachable: bool,
    pub fail_build: bool,
    pub fail_remove: bool,
    /// Images available locally.
    pub images: BTreeSet<String>,
    /// Images that can be pulled.
    pub registry: BTreeSet<String>,
    pub containers: BTreeMap<String, FakeContainer>,
    pub pushed_files: Vec<PushedFile>,
    /// Scripts executed, as `(container name, script)`.
    pub scripts: Vec<(String, String)>,
    /// Every engine call, in order.
    pub calls: Vec<String>,
    /// Dockerfile contents seen by `build`.
    pub dockerfiles: Vec<String>,
    responses: Vec<Response>,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeEngine {
    state: RefCell<State>,
}

fn failure(args: &[&str], lines: &[&str]) -> EngineError {
    EngineError::classify(process::Error {
        command: process::Command::new("docker").args(args.iter().map(std::ffi::OsStr::new)),
        kind: process::ErrorKind::NonZeroExitStatus(NonZeroI32::new(1)),
        output_tail: lines.iter().map(|&line| line.to_owned()).collect(),
    })
}

fn unreachable() -> EngineError {
    failure(
        &["info"],
        &["Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"],
    )
}

impl FakeEngine {
    pub fn state(&self) -> Ref<'_, State> {
        self.state.borrow()
    }

    pub fn with_image(self, image: &str) -> Self {
        self.state.borrow_mut().images.insert(image.to_owned());
        self
    }

    pub fn with_registry_image(self, image: &str) -> Self {
        self.state.borrow_mut().registry.insert(image.to_owned());
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.borrow_mut().unreachable = true;
        self
    }

    pub fn failing_build(self) -> Self {
        self.state.borrow_mut().fail_build = true;
        self
    }

    pub fn failing_remove(self) -> Self {
        self.state.borrow_mut().fail_remove = true;
        self
    }

    /// Makes `exec` of any script containing `needle` print `lines` and exit with `exit_code`. The
    /// first matching response wins.
    pub fn respond(self, needle: &str, exit_code: i32, lines: &[&str]) -> Self {
        self.state.borrow_mut().responses.push(Response {
            needle: needle.to_owned(),
            exit_code,
            lines: lines.iter().map(|&line| line.to_owned()).collect(),
        });
        self
    }

    /// Creates a container directly, as a leftover of an earlier run would be.
    pub fn with_container(self, name: &str, image: &str) -> Self {
        {
            let mut state = self.state.borrow_mut();
            let id = state.next_id();
            state.containers.insert(
                name.to_owned(),
                FakeContainer {
                    id,
                    image: image.to_owned(),
                    options: RunOptions {
                        hostname: "stale".to_owned(),
                        privileged: false,
                        volumes: Vec::new(),
                        env: Vec::new(),
                    },
                    running: true,
                },
            );
        }
        self
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn call(&self, call: String) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        if state.unreachable {
            return Err(unreachable());
        }
        Ok(())
    }
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", self.next_id)
    }

    fn container_by_id(&mut self, id: &str) -> Option<(&String, &mut FakeContainer)> {
        self.containers
            .iter_mut()
            .find(|(_, container)| container.id == id)
    }
}

impl ContainerEngine for FakeEngine {
    fn ping(&self) -> Result<(), EngineError> {
        self.call("ping".to_owned())
    }

    fn build(&self, args: BuildArgs) -> Result<(), EngineError> {
        self.call(format!("build {}", args.image))?;
        let mut state = self.state.borrow_mut();
        if let Ok(dockerfile) = std::fs::read_to_string(args.dockerfile) {
            state.dockerfiles.push(dockerfile);
        }
        if state.fail_build {
            return Err(failure(&["build"], &["ERROR: failed to solve"]));
        }
        state.images.insert(args.image.to_string());
        Ok(())
    }

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError> {
        self.call(format!("image_exists {image}"))?;
        Ok(self.state().images.contains(&image.to_string()))
    }

    fn pull(&self, image: &ImageName) -> Result<(), EngineError> {
        self.call(format!("pull {image}"))?;
        let mut state = self.state.borrow_mut();
        let image = image.to_string();
        if !state.registry.contains(&image) {
            return Err(failure(
                &["pull", &image],
                &["Error response from daemon: manifest unknown"],
            ));
        }
        state.images.insert(image);
        Ok(())
    }

    fn push(&self, image: &ImageName) -> Result<(), EngineError> {
        self.call(format!("push {image}"))?;
        let mut state = self.state.borrow_mut();
        state.registry.insert(image.to_string());
        Ok(())
    }

    fn find_container(&self, name: &str) -> Result<Option<String>, EngineError> {
        self.call(format!("find_container {name}"))?;
        Ok(self
            .state()
            .containers
            .get(name)
            .map(|container| container.id.clone()))
    }

    fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        self.call(format!("remove_container {id}"))?;
        let mut state = self.state.borrow_mut();
        if state.fail_remove {
            return Err(failure(&["rm", "--force", id], &["Error: removal in progress"]));
        }
        let name = state.container_by_id(id).map(|(name, _)| name.clone());
        match name {
            Some(name) => {
                state.containers.remove(&name);
                Ok(())
            }
            None => Err(failure(
                &["rm", "--force", id],
                &["Error: No such container"],
            )),
        }
    }

    fn create_container(&self, args: CreateArgs) -> Result<String, EngineError> {
        self.call(format!("create_container {} {}", args.name, args.image))?;
        let mut state = self.state.borrow_mut();
        if state.containers.contains_key(args.name) {
            return Err(failure(
                &["create", "--name", args.name],
                &["Error response from daemon: Conflict. The container name is already in use"],
            ));
        }
        if !state.images.contains(&args.image.to_string()) {
            return Err(failure(
                &["create", &args.image.to_string()],
                &["Unable to find image locally"],
            ));
        }
        let id = state.next_id();
        state.containers.insert(
            args.name.to_owned(),
            FakeContainer {
                id: id.clone(),
                image: args.image.to_string(),
                options: args.options.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.call(format!("start_container {id}"))?;
        let mut state = self.state.borrow_mut();
        match state.container_by_id(id) {
            Some((_, container)) => {
                container.running = true;
                Ok(())
            }
            None => Err(failure(&["start", id], &["Error: No such container"])),
        }
    }

    fn copy_into(
        &self,
        container: &ContainerHandle,
        local: &Path,
        remote: &str,
    ) -> Result<(), EngineError> {
        self.call(format!("copy_into {container} {remote}"))?;
        if !local.exists() {
            return Err(failure(
                &["cp", &local.to_string_lossy()],
                &["no such file or directory"],
            ));
        }
        self.state.borrow_mut().pushed_files.push(PushedFile {
            container: container.name.clone(),
            local: local.to_string_lossy().into_owned(),
            remote: remote.to_owned(),
            content: std::fs::read_to_string(local).ok(),
        });
        Ok(())
    }

    fn exec(
        &self,
        container: &ContainerHandle,
        script: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExecOutput, EngineError> {
        self.call(format!("exec {container}"))?;
        let response = {
            let mut state = self.state.borrow_mut();
            state
                .scripts
                .push((container.name.clone(), script.to_owned()));
            state
                .responses
                .iter()
                .find(|response| script.contains(&response.needle))
                .cloned()
        };
        let (exit_code, lines) = response
            .map(|response| (response.exit_code, response.lines))
            .unwrap_or_default();
        for line in &lines {
            on_line(line);
        }
        Ok(ExecOutput {
            exit_code: Some(exit_code),
            lines,
        })
    }

    fn commit(&self, container: &ContainerHandle, image: &ImageName) -> Result<String, EngineError> {
        self.call(format!("commit {container} {image}"))?;
        let mut state = self.state.borrow_mut();
        state.images.insert(image.to_string());
        Ok(format!("sha256:{}", state.next_id()))
    }
}
