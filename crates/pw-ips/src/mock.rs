//! In-memory ipset stand-in for tests and dry runs.

use crate::backend::{IpsCommand, IpsetBackend};
use crate::drift::render_save;
use crate::model::SetBase;
use pw_core::{CommandPrefix, CommandStatus, Error, IpsetConfig, Result};
use std::fs;

const FAILED: CommandStatus = CommandStatus::from_code(1);

#[derive(Debug, Clone, Default)]
pub struct MockIpset {
    calls: Vec<String>,
    failures: Vec<String>,
    probe_fails: bool,
    config: IpsetConfig,
    live: SetBase,
    restored: Vec<String>,
}

impl MockIpset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Makes every command whose rendering contains `pattern` exit non-zero.
    pub fn fail_matching(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Lines of the most recent restore script, in order.
    pub fn restored(&self) -> &[String] {
        &self.restored
    }

    pub fn live(&self) -> &SetBase {
        &self.live
    }

    pub fn live_mut(&mut self) -> &mut SetBase {
        &mut self.live
    }

    fn restore(&mut self, script: &str) -> CommandStatus {
        self.restored = script.lines().map(str::to_string).collect();

        for line in script.lines() {
            let words: Vec<&str> = line.split_whitespace().collect();
            let applied = match words.as_slice() {
                [] => Ok(()),
                ["create", name, ..] => self.live.add_set(name),
                ["flush", name] => self.live.flush_set(name),
                ["destroy", name] => {
                    self.live.destroy_set(name);
                    Ok(())
                }
                ["add", name, member] => match member.split_once('/') {
                    Some((addr, prefix)) => prefix
                        .parse()
                        .map_err(|_| Error::InvalidArgument(member.to_string()))
                        .and_then(|prefix| self.live.add_network(name, addr, prefix)),
                    None => self.live.add_address(name, member),
                },
                _ => Err(Error::InvalidArgument(line.to_string())),
            };
            if applied.is_err() {
                return FAILED;
            }
        }
        CommandStatus::SUCCESS
    }
}

impl IpsetBackend for MockIpset {
    fn program(&self) -> &str {
        "ipset"
    }

    fn run(&mut self, _prefix: &CommandPrefix, command: &IpsCommand<'_>) -> Result<CommandStatus> {
        let line = command.to_string();
        self.calls.push(line.clone());

        let failing = match command {
            IpsCommand::Probe => self.probe_fails,
            _ => self.failures.iter().any(|pattern| line.contains(pattern.as_str())),
        };
        if failing {
            return Ok(FAILED);
        }

        match *command {
            IpsCommand::Probe => Ok(CommandStatus::SUCCESS),
            IpsCommand::Save { dest } => {
                fs::write(dest, render_save(&self.live, &self.config)).map_err(|e| Error::io(dest, e))?;
                Ok(CommandStatus::SUCCESS)
            }
            IpsCommand::Restore { src } => {
                let script = fs::read_to_string(src).map_err(|e| Error::io(src, e))?;
                Ok(self.restore(&script))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_applies_create_flush_add_destroy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("script");
        let mut mock = MockIpset::new();
        mock.live_mut().add_set("sg-old").unwrap();

        fs::write(
            &src,
            "create sg-1 hash:net family inet hashsize 2048 maxelem 65536\nflush sg-1\nadd sg-1 10.0.0.0/24\n\
             create sg-old hash:net family inet hashsize 2048 maxelem 65536\nflush sg-old\ndestroy sg-old\n",
        )
        .unwrap();

        let status = mock.run(&CommandPrefix::default(), &IpsCommand::Restore { src: &src }).expect("run");
        assert!(status.success());
        assert!(mock.live().find_network("sg-1", "10.0.0.0", 24).is_some());
        assert!(mock.live().find_set("sg-old").is_none());
        assert_eq!(mock.restored().len(), 6);
    }

    #[test]
    fn malformed_script_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("script");
        fs::write(&src, "bogus sg-1\n").unwrap();

        let mut mock = MockIpset::new();
        let status = mock.run(&CommandPrefix::default(), &IpsCommand::Restore { src: &src }).expect("run");
        assert!(!status.success());
    }
}
