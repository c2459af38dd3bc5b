mod docker;
#[cfg(test)]
pub(crate) mod fake;

use std::{fmt, path::Path};

pub use docker::*;
use pe_image_name::ImageName;

use crate::process;

/// Messages the docker client prints when it can not talk to the daemon.
const UNREACHABLE_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "Is the docker daemon running",
    "error during connect",
];

const UNREACHABLE_TAIL_LINES: usize = 3;

/// A container created by [`ContainerEngine::create_container`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub host: String,
    pub container: String,
}

impl Volume {
    pub fn bind(host: &str, container: &str) -> Self {
        Self {
            host: host.to_owned(),
            container: container.to_owned(),
        }
    }
}

/// How a container is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub hostname: String,
    pub privileged: bool,
    pub volumes: Vec<Volume>,
    pub env: Vec<(String, String)>,
}

pub struct BuildArgs<'a> {
    pub dockerfile: &'a Path,
    pub context: &'a Path,
    pub image: &'a ImageName,
}

pub struct CreateArgs<'a> {
    pub image: &'a ImageName,
    pub name: &'a str,
    pub options: &'a RunOptions,
}

/// Exit code and interleaved stdout/stderr of a command executed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub lines: Vec<String>,
}

#[derive(Debug)]
pub enum EngineError {
    /// The engine endpoint could not be reached at all.
    Unreachable(process::Error),
    Command(process::Error),
    UnexpectedOutput { operation: &'static str, output: String },
}

impl EngineError {
    /// Turns a failed engine invocation into [`EngineError::Unreachable`] when its output says the
    /// daemon is not there.
    pub fn classify(error: process::Error) -> Self {
        if UNREACHABLE_MARKERS
            .iter()
            .any(|marker| error.output_contains(marker))
        {
            EngineError::Unreachable(error)
        } else {
            EngineError::Command(error)
        }
    }

    /// Whether the last lines of a client invocation say the daemon is not there. The client
    /// prints this after anything the command itself wrote.
    pub fn reports_unreachable(lines: &[String]) -> bool {
        let skip = lines.len().saturating_sub(UNREACHABLE_TAIL_LINES);
        lines[skip..].iter().any(|line| {
            UNREACHABLE_MARKERS
                .iter()
                .any(|marker| line.contains(marker))
        })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, EngineError::Unreachable(_))
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Unreachable(error) => write!(
                f,
                "unable to reach the container engine: {error}\n\
                hint: make sure the docker daemon is running and that DOCKER_HOST, if set, points at it"
            ),
            EngineError::Command(error) => error.fmt(f),
            EngineError::UnexpectedOutput { operation, output } => {
                write!(f, "unexpected output from `{operation}`: {output:?}")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Unreachable(error) | EngineError::Command(error) => Some(error),
            EngineError::UnexpectedOutput { .. } => None,
        }
    }
}

impl From<process::Error> for EngineError {
    fn from(value: process::Error) -> Self {
        EngineError::classify(value)
    }
}

/// The operations of the container engine this tool relies on. Every call blocks until the engine
/// is done.
pub trait ContainerEngine {
    /// Checks that the engine endpoint answers.
    fn ping(&self) -> Result<(), EngineError>;

    fn build(&self, args: BuildArgs) -> Result<(), EngineError>;

    fn image_exists(&self, image: &ImageName) -> Result<bool, EngineError>;

    fn pull(&self, image: &ImageName) -> Result<(), EngineError>;

    fn push(&self, image: &ImageName) -> Result<(), EngineError>;

    /// Returns the id of the container called `name`, running or not.
    fn find_container(&self, name: &str) -> Result<Option<String>, EngineError>;

    /// Removes the container, stopping it first if necessary.
    fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// Creates a container and returns its id. The container is not started.
    fn create_container(&self, args: CreateArgs) -> Result<String, EngineError>;

    fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Copies a local file or directory into the container.
    fn copy_into(
        &self,
        container: &ContainerHandle,
        local: &Path,
        remote: &str,
    ) -> Result<(), EngineError>;

    /// Runs `script` with bash inside the container, passing each line of output to `on_line` as it
    /// arrives. A non-zero exit is not an error at this level.
    fn exec(
        &self,
        container: &ContainerHandle,
        script: &str,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<ExecOutput, EngineError>;

    /// Snapshots the container into `image` and returns the id of the new image.
    fn commit(&self, container: &ContainerHandle, image: &ImageName) -> Result<String, EngineError>;
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroI32;

    use super::*;

    fn failed(lines: &[&str]) -> process::Error {
        process::Error {
            command: process::command!("docker", "ps"),
            kind: process::ErrorKind::NonZeroExitStatus(NonZeroI32::new(1)),
            output_tail: lines.iter().map(|&line| line.to_owned()).collect(),
        }
    }

    #[test]
    fn daemon_errors_are_classified_as_unreachable() {
        let error = EngineError::classify(failed(&[
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?",
        ]));
        assert!(error.is_unreachable());
        assert!(error.to_string().contains("hint:"));
    }

    #[test]
    fn other_errors_are_not_unreachable() {
        let error = EngineError::classify(failed(&["Error: No such container: pe_master_public"]));
        assert!(!error.is_unreachable());
        assert!(error.to_string().contains("No such container"));
    }
}
