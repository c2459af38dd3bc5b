//! Running commands and placing files inside a running container.

use std::{fmt, path::Path};

use log::{debug, info, warn};

use crate::{
    engine::{ContainerEngine, ContainerHandle, EngineError},
    shell,
};

/// Prepended to `PATH` so the tools installed by Puppet Enterprise win over the system ones.
pub const PATH_PREFIX: &str = "/opt/puppetlabs/puppet/bin:/opt/puppetlabs/bin";

/// Present while a puppet agent run is in progress.
pub const AGENT_LOCK: &str = "/opt/puppetlabs/puppet/cache/state/agent_catalog_run.lock";

const LOCK_POLL_SECS: u32 = 5;
const ERROR_OUTPUT_LINES: usize = 40;

/// How the exit status of a remote command is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPolicy {
    /// Only exit code 0 succeeds.
    Strict,
    /// A `puppet agent -t` run, where exit code 2 means changes were applied.
    PuppetRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    OutputContains(&'static str),
    ExitCode(i32),
}

/// A non-zero outcome that does not fail the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub name: &'static str,
    /// `None` applies to every policy.
    policy: Option<SuccessPolicy>,
    rule: Rule,
}

impl Allowance {
    fn matches(&self, policy: SuccessPolicy, exit_code: i32, lines: &[String]) -> bool {
        if self.policy.is_some_and(|only| only != policy) {
            return false;
        }
        match self.rule {
            Rule::OutputContains(pattern) => lines.iter().any(|line| line.contains(pattern)),
            Rule::ExitCode(code) => code == exit_code,
        }
    }
}

/// Every tolerated non-zero outcome. Nothing else is suppressed.
pub const ALLOW_LIST: &[Allowance] = &[
    Allowance {
        name: "benign shell integer comparison warning",
        policy: None,
        rule: Rule::OutputContains("integer expression expected"),
    },
    Allowance {
        name: "puppet agent applied changes",
        policy: Some(SuccessPolicy::PuppetRun),
        rule: Rule::ExitCode(2),
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Tolerated(&'static Allowance),
    Failure,
}

/// Judges the outcome of a remote command. A command killed by a signal always fails.
pub fn evaluate(policy: SuccessPolicy, exit_code: Option<i32>, lines: &[String]) -> Verdict {
    match exit_code {
        Some(0) => Verdict::Success,
        Some(code) => ALLOW_LIST
            .iter()
            .find(|allowance| allowance.matches(policy, code, lines))
            .map_or(Verdict::Failure, Verdict::Tolerated),
        None => Verdict::Failure,
    }
}

/// A shell snippet to run in the container and the policy its exit status is judged by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub script: String,
    pub policy: SuccessPolicy,
}

impl RemoteCommand {
    pub fn strict(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            policy: SuccessPolicy::Strict,
        }
    }

    pub fn puppet_run(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            policy: SuccessPolicy::PuppetRun,
        }
    }

    /// Polls inside the container until `lock` is gone, then runs the command.
    pub fn after_lock_clears(self, lock: &str) -> Self {
        let lock = shell::quote(lock);
        Self {
            script: format!(
                "while [ -e {lock} ]; do echo \"waiting for {lock} to clear\"; sleep {LOCK_POLL_SECS}; done\n{script}",
                script = self.script
            ),
            policy: self.policy,
        }
    }
}

/// Exit code and output of a remote command that passed its policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandResult {
    pub exit_code: i32,
    pub lines: Vec<String>,
}

#[derive(Debug)]
pub enum RemoteError {
    Engine {
        step: String,
        error: EngineError,
    },
    CommandFailed {
        step: String,
        exit_code: Option<i32>,
        output: Vec<String>,
    },
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Engine { step, error } => write!(f, "step {step:?}: {error}"),
            RemoteError::CommandFailed {
                step,
                exit_code,
                output,
            } => {
                match exit_code {
                    Some(code) => write!(f, "step {step:?} failed with exit code {code}")?,
                    None => write!(f, "step {step:?} was terminated by a signal")?,
                }
                let skip = output.len().saturating_sub(ERROR_OUTPUT_LINES);
                if skip > 0 {
                    write!(f, "\n  ... {skip} earlier lines omitted")?;
                }
                for line in &output[skip..] {
                    write!(f, "\n  {line}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteError::Engine { error, .. } => Some(error),
            RemoteError::CommandFailed { .. } => None,
        }
    }
}

/// A running container commands are executed in.
pub struct Remote<'a> {
    engine: &'a dyn ContainerEngine,
    container: &'a ContainerHandle,
}

impl<'a> Remote<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, container: &'a ContainerHandle) -> Self {
        Self { engine, container }
    }

    /// Copies `local` to `remote`, creating the parent directory first.
    pub fn push_file(&self, step: &str, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if let Some((parent, _)) = remote.rsplit_once('/').filter(|(parent, _)| !parent.is_empty()) {
            self.run(
                step,
                &RemoteCommand::strict(format!("mkdir -p {}", shell::quote(parent))),
            )?;
        }
        self.engine
            .copy_into(self.container, local, remote)
            .map_err(|error| RemoteError::Engine {
                step: step.to_owned(),
                error,
            })?;
        info!("[{}] pushed {local:?} to {remote}", self.container);
        Ok(())
    }

    /// Runs the command with bash and judges its exit status against [`ALLOW_LIST`].
    pub fn run(&self, step: &str, command: &RemoteCommand) -> Result<RemoteCommandResult, RemoteError> {
        let script = format!("export PATH={PATH_PREFIX}:$PATH\n{}", command.script);
        debug!("[{}] {step}: {}", self.container, command.script);

        let container = self.container;
        let output = self
            .engine
            .exec(container, &script, &mut |line: &str| info!("[{container}] {line}"))
            .map_err(|error| RemoteError::Engine {
                step: step.to_owned(),
                error,
            })?;

        match evaluate(command.policy, output.exit_code, &output.lines) {
            Verdict::Success => {}
            Verdict::Tolerated(allowance) => warn!(
                "[{container}] {step} exited with {code:?}, tolerated as {name}",
                code = output.exit_code,
                name = allowance.name
            ),
            Verdict::Failure => {
                return Err(RemoteError::CommandFailed {
                    step: step.to_owned(),
                    exit_code: output.exit_code,
                    output: output.lines,
                })
            }
        }

        Ok(RemoteCommandResult {
            exit_code: output.exit_code.unwrap_or_default(),
            lines: output.lines,
        })
    }
}
