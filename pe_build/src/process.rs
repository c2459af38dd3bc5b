use std::{
    ffi::OsStr,
    fmt,
    io::{self, BufRead, BufReader, Read},
    num::NonZeroI32,
    process,
    sync::mpsc,
    thread,
};

use log::debug;

/// Number of trailing output lines kept in an [`Error`].
const OUTPUT_TAIL_LINES: usize = 20;

pub struct Command(process::Command);

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self(process::Command::new(program))
    }

    pub fn args<'a, I>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = &'a OsStr>,
    {
        self.0.args(args);
        self
    }

    pub fn try_output(mut self) -> Result<Output, Error> {
        if log::log_enabled!(log::Level::Debug) {
            debug!("capturing `{command:?}`...", command = &self.0);
        }

        match self.0.output() {
            Ok(output) => Ok(Output {
                command: self,
                output,
            }),
            Err(error) => Err(Error::spawn(self, error)),
        }
    }

    pub fn output(self) -> Result<Output, Error> {
        self.try_output().and_then(Output::require_success)
    }

    /// Runs the command and hands every line of stdout and stderr to `on_line` as soon as it is
    /// produced. Lines of both streams are interleaved in the order they arrive.
    pub fn try_stream<F>(mut self, mut on_line: F) -> Result<Streamed, Error>
    where
        F: FnMut(&str),
    {
        if log::log_enabled!(log::Level::Debug) {
            debug!("streaming `{command:?}`...", command = &self.0);
        }

        let mut child = match self
            .0
            .stdin(process::Stdio::null())
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => return Err(Error::spawn(self, error)),
        };

        let (sender, receiver) = mpsc::channel::<String>();
        let readers = [
            child.stdout.take().map(|stdout| forward_lines(stdout, sender.clone())),
            child.stderr.take().map(|stderr| forward_lines(stderr, sender.clone())),
        ];
        // Dropping our sender ends the loop below once both readers hit EOF.
        drop(sender);

        let mut lines = Vec::new();
        for line in receiver {
            on_line(&line);
            lines.push(line);
        }

        for reader in readers.into_iter().flatten() {
            // A reader only panics if the channel is gone, which can not happen before this point.
            let _ = reader.join();
        }

        match child.wait() {
            Ok(status) => Ok(Streamed {
                command: self,
                status,
                lines,
            }),
            Err(error) => Err(Error::spawn(self, error)),
        }
    }

    pub fn stream<F>(self, on_line: F) -> Result<Streamed, Error>
    where
        F: FnMut(&str),
    {
        self.try_stream(on_line).and_then(Streamed::require_success)
    }
}

fn forward_lines<R: Read + Send + 'static>(
    reader: R,
    sender: mpsc::Sender<String>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            if sender.send(line).is_err() {
                break;
            }
        }
    })
}

fn tail(lines: impl DoubleEndedIterator<Item = String>) -> Vec<String> {
    let mut tail: Vec<String> = lines.rev().take(OUTPUT_TAIL_LINES).collect();
    tail.reverse();
    tail
}

#[derive(Debug)]
pub struct Output {
    pub command: Command,
    pub output: process::Output,
}

impl Output {
    pub fn require_success(self) -> Result<Output, Error> {
        let Output { command, output } = self;
        if output.status.success() {
            Ok(Output { command, output })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error {
                command,
                kind: ErrorKind::NonZeroExitStatus(output.status.code().and_then(NonZeroI32::new)),
                output_tail: tail(stderr.lines().map(str::to_owned)),
            })
        }
    }

    pub fn stdout_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.output.stdout)
    }
}

impl std::ops::Deref for Output {
    type Target = process::Output;

    fn deref(&self) -> &Self::Target {
        &self.output
    }
}

/// The result of [`Command::try_stream`].
#[derive(Debug)]
pub struct Streamed {
    pub command: Command,
    pub status: process::ExitStatus,
    pub lines: Vec<String>,
}

impl Streamed {
    pub fn require_success(self) -> Result<Streamed, Error> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Describes the run as a failure, keeping the tail of its output.
    pub fn into_error(self) -> Error {
        let Streamed {
            command,
            status,
            lines,
        } = self;
        Error {
            command,
            kind: ErrorKind::NonZeroExitStatus(status.code().and_then(NonZeroI32::new)),
            output_tail: tail(lines.into_iter()),
        }
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    Io(io::Error),
    NonZeroExitStatus(Option<NonZeroI32>),
}

impl From<io::Error> for ErrorKind {
    fn from(value: io::Error) -> Self {
        match value.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ => ErrorKind::Io(value),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub command: Command,
    pub kind: ErrorKind,
    /// The last lines written by the command, when they were captured.
    pub output_tail: Vec<String>,
}

impl Error {
    fn spawn(command: Command, error: io::Error) -> Self {
        Self {
            command,
            kind: error.into(),
            output_tail: Vec::new(),
        }
    }

    /// Returns true if any captured line contains `needle`.
    pub fn output_contains(&self, needle: &str) -> bool {
        self.output_tail.iter().any(|line| line.contains(needle))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to run `{command:?}`: ",
            command = &self.command.0
        )?;
        let program = self.command.0.get_program().to_string_lossy();
        match &self.kind {
            ErrorKind::NotFound => {
                write!(f, "the `{program}` command is required but not available on your system, please install it")?;
            }
            ErrorKind::PermissionDenied => {
                write!(f, "the `{program}` command is available but does not have the right permissions, please make sure the binary is executable")?;
            }
            ErrorKind::Io(error) => {
                write!(f, "{error}")?;
            }
            ErrorKind::NonZeroExitStatus(code) => {
                if let Some(code) = code {
                    write!(f, "exited with non-zero exit code `{code}`")?;
                } else {
                    write!(f, "did not run succesfully")?;
                }
            }
        }
        for line in &self.output_tail {
            write!(f, "\n  {line}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Creates a new [`Command`] and supplies the provided arguments, if any, while calling
/// [`std::convert::AsRef::as_ref`] on each.
macro_rules! command {
    ($program:expr, $($arg:expr),* $(,)?) => {
        $crate::process::args!($crate::process::Command::new($program), $($arg,)*)
    };
}

/// Calls [`Command::args`] on the provided [`Command`] while calling [`std::convert::AsRef::as_ref`]
/// on each argument.
macro_rules! args {
    ($program:expr, $($arg:expr),+ $(,)?) => {
        $program.args([
            $(::std::convert::AsRef::<::std::ffi::OsStr>::as_ref(&$arg),)*
        ])
    }
}

pub(crate) use args;
pub(crate) use command;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_collects_stdout_and_stderr() {
        let mut seen = Vec::new();
        let streamed = command!("sh", "-c", "echo out; echo err >&2")
            .stream(|line| seen.push(line.to_owned()))
            .unwrap();
        assert!(streamed.status.success());
        seen.sort();
        assert_eq!(seen, ["err", "out"]);
        assert_eq!(streamed.lines.len(), 2);
    }

    #[test]
    fn stream_reports_exit_code_and_output() {
        let error = command!("sh", "-c", "echo boom; exit 3")
            .stream(|_| {})
            .unwrap_err();
        assert!(matches!(
            error.kind,
            ErrorKind::NonZeroExitStatus(Some(code)) if code.get() == 3
        ));
        assert!(error.output_contains("boom"));
        assert!(error.to_string().contains("`3`"));
    }

    #[test]
    fn missing_program_is_reported() {
        let error = command!("pe-build-does-not-exist", "--version")
            .output()
            .unwrap_err();
        assert!(matches!(error.kind, ErrorKind::NotFound));
        assert!(error.to_string().contains("not available on your system"));
    }

    #[test]
    fn output_keeps_stderr_tail() {
        let error = command!("sh", "-c", "for i in $(seq 1 30); do echo line$i >&2; done; exit 1")
            .output()
            .unwrap_err();
        assert_eq!(error.output_tail.len(), OUTPUT_TAIL_LINES);
        assert_eq!(error.output_tail.last().map(String::as_str), Some("line30"));
    }
}
