use pw_core::exec;
use pw_core::{CommandPrefix, CommandStatus, Result};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpsCommand<'a> {
    /// `-L`: health check during init
    Probe,
    /// `save`, written to `dest`
    Save { dest: &'a Path },
    /// `-! restore` fed from `src`; existing sets are not an error
    Restore { src: &'a Path },
}

impl IpsCommand<'_> {
    pub fn args(&self) -> &'static [&'static str] {
        match self {
            IpsCommand::Probe => &["-L"],
            IpsCommand::Save { .. } => &["save"],
            IpsCommand::Restore { .. } => &["-!", "restore"],
        }
    }
}

impl fmt::Display for IpsCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args().join(" "))?;
        match self {
            IpsCommand::Probe => Ok(()),
            IpsCommand::Save { dest } => write!(f, " > {}", dest.display()),
            IpsCommand::Restore { src } => write!(f, " < {}", src.display()),
        }
    }
}

pub trait IpsetBackend {
    fn program(&self) -> &str;

    /// Runs one command; `Err` only for local I/O on the redirected file.
    fn run(&mut self, prefix: &CommandPrefix, command: &IpsCommand<'_>) -> Result<CommandStatus>;

    fn command_line(&self, prefix: &CommandPrefix, command: &IpsCommand<'_>) -> String {
        if prefix.is_empty() {
            format!("{} {}", self.program(), command)
        } else {
            format!("{} {} {}", prefix.as_str(), self.program(), command)
        }
    }
}

/// Runs the real `ipset` binary
#[derive(Debug, Clone)]
pub struct ShellIpset {
    program: String,
}

impl ShellIpset {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ShellIpset {
    fn default() -> Self {
        Self::new("ipset")
    }
}

impl IpsetBackend for ShellIpset {
    fn program(&self) -> &str {
        &self.program
    }

    fn run(&mut self, prefix: &CommandPrefix, command: &IpsCommand<'_>) -> Result<CommandStatus> {
        let mut cmd = prefix.command(&self.program);
        cmd.args(command.args());

        match *command {
            IpsCommand::Probe => Ok(exec::run_quiet(&mut cmd)),
            IpsCommand::Save { dest } => exec::run_to_file(&mut cmd, dest, false),
            IpsCommand::Restore { src } => exec::run_from_file(&mut cmd, src),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_lines_show_redirection() {
        let backend = ShellIpset::default();
        let file = Path::new("/tmp/pw_ips_file-abc123");

        assert_eq!(
            backend.command_line(&CommandPrefix::parse("sudo"), &IpsCommand::Restore { src: file }),
            "sudo ipset -! restore < /tmp/pw_ips_file-abc123"
        );
        assert_eq!(
            backend.command_line(&CommandPrefix::default(), &IpsCommand::Save { dest: file }),
            "ipset save > /tmp/pw_ips_file-abc123"
        );
    }

    #[test]
    fn missing_restore_input_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut backend = ShellIpset::default();
        let src = dir.path().join("missing");

        let err = backend
            .run(&CommandPrefix::default(), &IpsCommand::Restore { src: &src })
            .unwrap_err();
        assert!(matches!(err, pw_core::Error::Io { .. }));
    }
}
