//! Launching language server processes.
//!
//! [`ServerLauncher`] is the seam between the supervisor and the operating
//! system: the production [`ProcessLauncher`] spawns a child process with
//! piped stdio, while tests substitute in-process fakes.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use camino::Utf8Path;
use tracing::debug;

use super::error::LaunchError;
use super::lifecycle::{SUPERVISOR_TARGET, force_exit, terminate_child};
use crate::language::LanguageId;

/// A command line split into program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Parses a configured command string.
    ///
    /// Runs of spaces collapse into one separator and a leading `~/` expands
    /// to the user's home directory. Quoting is not supported.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::EmptyCommand`] for blank input.
    pub fn parse(input: &str) -> Result<Self, LaunchError> {
        Self::parse_with_home(input, dirs::home_dir().as_deref())
    }

    fn parse_with_home(input: &str, home: Option<&Path>) -> Result<Self, LaunchError> {
        let trimmed = input.trim();
        let expanded = match (trimmed.strip_prefix("~/"), home) {
            (Some(rest), Some(home)) => format!("{}/{rest}", home.display()),
            _ => trimmed.to_owned(),
        };
        let mut parts = expanded.split_whitespace().map(str::to_owned);
        let program = parts.next().ok_or(LaunchError::EmptyCommand)?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Program to execute.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Everything needed to launch one server.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Language the server is launched for.
    pub language: &'a LanguageId,
    /// Parsed command line.
    pub command: &'a CommandLine,
    /// Environment overrides layered over the inherited environment.
    pub env: &'a BTreeMap<String, String>,
    /// Pass stderr through instead of discarding it.
    pub show_stderr: bool,
    /// Working directory, usually the project root.
    pub working_dir: Option<&'a Utf8Path>,
}

/// Handle on a running server used for exit detection and termination.
pub trait ServerProcess: Send {
    /// Operating system process id, when there is one.
    fn pid(&self) -> Option<u32>;

    /// Returns `true` once the process has exited.
    fn has_exited(&mut self) -> bool;

    /// Reaps the process, killing it after a short grace period.
    fn terminate(&mut self);

    /// Kills the process immediately.
    fn force_exit(&mut self);
}

/// Connection halves and process handle of a launched server.
pub struct LaunchedServer {
    /// Server stdout.
    pub reader: Box<dyn Read + Send>,
    /// Server stdin.
    pub writer: Box<dyn Write + Send>,
    /// Process handle.
    pub process: Box<dyn ServerProcess>,
}

/// Starts language servers.
pub trait ServerLauncher {
    /// Launches a server for `request`.
    ///
    /// # Errors
    ///
    /// Returns a [`LaunchError`] describing why the server could not start.
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchedServer, LaunchError>;
}

/// Launcher that spawns real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest<'_>) -> Result<LaunchedServer, LaunchError> {
        debug!(
            target: SUPERVISOR_TARGET,
            language = %request.language,
            command = request.command.program(),
            args = ?request.command.args(),
            "spawning language server process"
        );

        let mut command = Command::new(request.command.program());
        command
            .args(request.command.args())
            .envs(request.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if request.show_stderr {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        if let Some(dir) = request.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|source| spawn_error(request.command.program(), source))?;
        let stdin = child
            .stdin
            .take()
            .ok_or(LaunchError::MissingPipe { stream: "stdin" });
        let stdout = child
            .stdout
            .take()
            .ok_or(LaunchError::MissingPipe { stream: "stdout" });
        let (stdin, stdout) = match (stdin, stdout) {
            (Ok(stdin), Ok(stdout)) => (stdin, stdout),
            (Err(error), _) | (_, Err(error)) => {
                force_exit(&mut child, request.language);
                return Err(error);
            }
        };

        debug!(
            target: SUPERVISOR_TARGET,
            language = %request.language,
            pid = child.id(),
            "language server process spawned"
        );
        Ok(LaunchedServer {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            process: Box::new(ChildProcess {
                child,
                language: request.language.clone(),
            }),
        })
    }
}

fn spawn_error(program: &str, source: io::Error) -> LaunchError {
    let command = program.to_owned();
    if source.kind() == io::ErrorKind::NotFound {
        LaunchError::BinaryNotFound { command, source }
    } else {
        LaunchError::SpawnFailed { command, source }
    }
}

struct ChildProcess {
    child: Child,
    language: LanguageId,
}

impl ServerProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    fn terminate(&mut self) {
        terminate_child(&mut self.child, &self.language);
    }

    fn force_exit(&mut self) {
        force_exit(&mut self.child, &self.language);
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            force_exit(&mut self.child, &self.language);
        }
    }
}
