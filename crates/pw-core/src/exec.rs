//! Backend command plumbing shared by the ebtables and ipset gateways.
//!
//! Commands are built with `std::process::Command` (never through a shell) and
//! every run is traced with its exit code. Callers decide whether a non-zero
//! exit is fatal.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tracing::{debug, error, trace};

/// Execution context prepended to every backend invocation (e.g. `sudo`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CommandPrefix {
    raw: String,
    argv: Vec<String>,
}

impl CommandPrefix {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.trim().to_string(),
            argv: raw.split_whitespace().map(str::to_string).collect(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Starts a command line for `program` behind the prefix.
    pub fn command(&self, program: &str) -> Command {
        match self.argv.split_first() {
            Some((head, rest)) => {
                let mut cmd = Command::new(head);
                cmd.args(rest).arg(program);
                cmd
            }
            None => Command::new(program),
        }
    }
}

impl From<String> for CommandPrefix {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<CommandPrefix> for String {
    fn from(prefix: CommandPrefix) -> Self {
        prefix.raw
    }
}

/// Exit status of a backend command, shell-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus(i32);

impl CommandStatus {
    pub const SUCCESS: Self = Self(0);
    /// Reported when the command could not be spawned at all
    pub const NOT_RUN: Self = Self(127);

    pub const fn from_code(code: i32) -> Self {
        Self(code)
    }

    pub fn code(self) -> i32 {
        self.0
    }

    pub fn success(self) -> bool {
        self.0 == 0
    }
}

impl From<ExitStatus> for CommandStatus {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Self(code),
            (None, Some(signal)) => Self(128 + signal),
            (None, None) => Self(-1),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.0)
    }
}

/// Renders a command line for log messages.
pub fn describe(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Runs with stdout discarded.
pub fn run_quiet(cmd: &mut Command) -> CommandStatus {
    cmd.stdin(Stdio::null()).stdout(Stdio::null());
    finish(cmd)
}

/// Runs with stdout written to `dest`, truncating it or appending to it.
pub fn run_to_file(cmd: &mut Command, dest: &Path, append: bool) -> Result<CommandStatus> {
    let mut options = OpenOptions::new();
    options.create(true).mode(0o600);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    let file = options.open(dest).map_err(|e| Error::io(dest, e))?;

    cmd.stdin(Stdio::null()).stdout(Stdio::from(file));
    Ok(finish(cmd))
}

/// Runs with stdin read from `src`.
pub fn run_from_file(cmd: &mut Command, src: &Path) -> Result<CommandStatus> {
    let file = OpenOptions::new()
        .read(true)
        .open(src)
        .map_err(|e| Error::io(src, e))?;

    cmd.stdin(Stdio::from(file)).stdout(Stdio::null());
    Ok(finish(cmd))
}

fn finish(cmd: &mut Command) -> CommandStatus {
    let line = describe(cmd);
    cmd.stderr(Stdio::piped());

    let status = match cmd.output() {
        Ok(output) => {
            let status = CommandStatus::from(output.status);
            if !status.success() && !output.stderr.is_empty() {
                debug!(
                    command = %line,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                    "backend command reported an error"
                );
            }
            status
        }
        Err(e) => {
            error!(command = %line, error = %e, "could not spawn backend command");
            CommandStatus::NOT_RUN
        }
    };

    trace!(exit = status.code(), command = %line, "executed command");
    status
}
