use std::{
    ffi::{OsStr, OsString},
    path::Path,
};

use log::{debug, info};
use pe_image_name::ImageName;

use super::{BuildArgs, ContainerEngine, ContainerHandle, CreateArgs, EngineError, ExecOutput};
use crate::process;

/// Talks to the container engine through the `docker` command line client.
pub struct DockerCli {
    program: OsString,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn docker(&self) -> process::Command {
        process::Command::new(&self.program)
    }

    /// Captures stdout of a docker invocation that is expected to print a single value.
    fn capture_one(
        &self,
        operation: &'static str,
        command: process::Command,
    ) -> Result<String, EngineError> {
        let output = command.output()?;
        let value = output
            .stdout_str()
            .map_err(|_| EngineError::UnexpectedOutput {
                operation,
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            })?
            .trim();
        if value.is_empty() || value.contains('\n') {
            return Err(EngineError::UnexpectedOutput {
                operation,
                output: value.to_owned(),
            });
        }
        Ok(value.to_owned())
    }

    fn stream(&self, prefix: &str, command: process::Command) -> Result<(), EngineError> {
        command.stream(|line| info!("[{prefix}] {line}"))?;
        Ok(())
    }
}

fn create_args(args: &CreateArgs) -> Vec<String> {
    let CreateArgs {
        image,
        name,
        options,
    } = args;

    let mut out = vec![
        "create".to_owned(),
        "--publish-all".to_owned(),
        "--hostname".to_owned(),
        options.hostname.clone(),
        "--name".to_owned(),
        (*name).to_owned(),
    ];
    if options.privileged {
        out.push("--privileged".to_owned());
    }
    for volume in &options.volumes {
        out.push("--volume".to_owned());
        out.push(format!("{}:{}", volume.host, volume.container));
    }
    for (key, value) in &options.env {
        out.push("--env".to_owned());
        out.push(format!("{key}={value}"));
    }
    out.push(image.to_string());
    out
}

impl ContainerEngine for DockerCli {
    fn ping(&self) -> Result<(), EngineError> {
        let version = self.capture_one(
            "docker version",
            process::args!(self.docker(), "version", "--format", "{{.Server.Version}}"),
        )?;
        debug!("docker server version: {version}");
        Ok(())
    }

    fn build(&self, args: BuildArgs) -> Result<(), EngineError> {
        let BuildArgs {
            dockerfile,
            context,
            image,
        } = args;
        self.stream(
            &image.to_string(),
            process::args!(
                self.docker(),
                "build",
                "--rm",
                "--file",
                dockerfile,
                "--tag",
                image.to_string(),
                context,
            ),
        )
    }

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError> {
        let output = process::args!(
            self.docker(),
            "image",
            "inspect",
            "--format",
            "{{.Id}}",
            image.to_string(),
        )
        .try_output()?;
        match output.require_success() {
            Ok(_) => Ok(true),
            Err(error) => match EngineError::classify(error) {
                unreachable @ EngineError::Unreachable(_) => Err(unreachable),
                _ => Ok(false),
            },
        }
    }

    fn pull(&self, image: &ImageName) -> Result<(), EngineError> {
        let image = image.to_string();
        self.stream(&image, process::args!(self.docker(), "pull", &image))
    }

    fn push(&self, image: &ImageName) -> Result<(), EngineError> {
        let image = image.to_string();
        self.stream(&image, process::args!(self.docker(), "push", &image))
    }

    fn find_container(&self, name: &str) -> Result<Option<String>, EngineError> {
        let output = process::args!(
            self.docker(),
            "ps",
            "--all",
            "--quiet",
            "--no-trunc",
            "--filter",
            format!("name=^/{name}$"),
        )
        .output()?;
        let stdout = output
            .stdout_str()
            .map_err(|_| EngineError::UnexpectedOutput {
                operation: "docker ps",
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
            })?;
        Ok(stdout.lines().map(str::trim).find(|id| !id.is_empty()).map(str::to_owned))
    }

    fn remove_container(&self, id: &str) -> Result<(), EngineError> {
        process::args!(self.docker(), "rm", "--force", id).output()?;
        Ok(())
    }

    fn create_container(&self, args: CreateArgs) -> Result<String, EngineError> {
        let create_args = create_args(&args);
        self.capture_one(
            "docker create",
            self.docker().args(create_args.iter().map(OsStr::new)),
        )
    }

    fn start_container(&self, id: &str) -> Result<(), EngineError> {
        process::args!(self.docker(), "start", id).output()?;
        Ok(())
    }

    fn copy_into(
        &self,
        container: &ContainerHandle,
        local: &Path,
        remote: &str,
    ) -> Result<(), EngineError> {
        process::args!(
            self.docker(),
            "cp",
            local,
            format!("{id}:{remote}", id = container.id),
        )
        .output()?;
        Ok(())
    }

    fn exec(
        &self,
        container: &ContainerHandle,
        script: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExecOutput, EngineError> {
        let streamed = process::args!(
            self.docker(),
            "exec",
            &container.id,
            "/bin/bash",
            "-c",
            script,
        )
        .try_stream(on_line)?;
        exec_output(streamed)
    }

    fn commit(&self, container: &ContainerHandle, image: &ImageName) -> Result<String, EngineError> {
        self.capture_one(
            "docker commit",
            process::args!(self.docker(), "commit", &container.id, image.to_string()),
        )
    }
}

/// A failing script is an ordinary outcome of `docker exec`, a client that lost the daemon is not.
fn exec_output(streamed: process::Streamed) -> Result<ExecOutput, EngineError> {
    let exit_code = streamed.status.code();
    if exit_code != Some(0) && EngineError::reports_unreachable(&streamed.lines) {
        return Err(EngineError::Unreachable(streamed.into_error()));
    }
    Ok(ExecOutput {
        exit_code,
        lines: streamed.lines,
    })
}
