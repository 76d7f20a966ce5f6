//! In-memory ebtables stand-in for tests and dry runs.
//!
//! Keeps a staged and a live rule base per namespace: commands against an
//! atomic file edit the staged copy, `--atomic-commit` publishes it, and
//! `--atomic-save` snapshots live state for the next `-L`.

use crate::backend::{EbtBackend, EbtCommand, Namespace, normalize_rule};
use crate::drift::render_listing;
use crate::model::RuleSet;
use pw_core::{CommandPrefix, CommandStatus, Error, Result};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const FAILED: CommandStatus = CommandStatus::from_code(1);
const REJECTED: CommandStatus = CommandStatus::from_code(255);

#[derive(Debug, Clone)]
pub struct MockEbtables {
    calls: Vec<String>,
    failures: Vec<String>,
    probe_fails: bool,
    staged: BTreeMap<Namespace, RuleSet>,
    live: BTreeMap<Namespace, RuleSet>,
    saved: BTreeMap<Namespace, RuleSet>,
}

impl MockEbtables {
    pub fn new() -> Self {
        let fresh: BTreeMap<_, _> = Namespace::ALL.into_iter().map(|ns| (ns, builtin_rules(ns))).collect();
        Self {
            calls: Vec::new(),
            failures: Vec::new(),
            probe_fails: false,
            staged: fresh.clone(),
            live: fresh.clone(),
            saved: fresh,
        }
    }

    /// Makes the `-L` health check fail.
    pub fn fail_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Makes every command whose arguments contain `pattern` exit non-zero.
    pub fn fail_matching(mut self, pattern: &str) -> Self {
        self.failures.push(pattern.to_string());
        self
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
        self.probe_fails = false;
    }

    /// Arguments of every command run so far, in order.
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    pub fn live(&self, ns: Namespace) -> Option<&RuleSet> {
        self.live.get(&ns)
    }

    /// Live state to seed before a resync.
    pub fn live_mut(&mut self, ns: Namespace) -> &mut RuleSet {
        self.live.entry(ns).or_insert_with(|| builtin_rules(ns))
    }

    fn fails(&self, command: &EbtCommand<'_>, line: &str) -> bool {
        match command {
            EbtCommand::Probe => self.probe_fails,
            _ => self.failures.iter().any(|pattern| line.contains(pattern.as_str())),
        }
    }

    fn staged(&mut self, ns: Namespace) -> &mut RuleSet {
        self.staged.entry(ns).or_insert_with(|| builtin_rules(ns))
    }
}

impl Default for MockEbtables {
    fn default() -> Self {
        Self::new()
    }
}

impl EbtBackend for MockEbtables {
    fn program(&self) -> &str {
        "ebtables"
    }

    fn run(&mut self, _prefix: &CommandPrefix, command: &EbtCommand<'_>) -> Result<CommandStatus> {
        let line = command.to_string();
        self.calls.push(line.clone());
        if self.fails(command, &line) {
            return Ok(FAILED);
        }

        match *command {
            EbtCommand::Probe => Ok(CommandStatus::SUCCESS),
            EbtCommand::AtomicInit { ns, file } => {
                self.staged.insert(ns, builtin_rules(ns));
                write_file(file, "", false)?;
                Ok(CommandStatus::SUCCESS)
            }
            EbtCommand::NewChain { ns, file, chain } => {
                let staged = self.staged(ns);
                if staged.find_chain(ns.as_str(), chain).is_some() {
                    return Ok(REJECTED);
                }
                staged.add_chain(ns.as_str(), chain, "ACCEPT", "")?;
                write_file(file, &format!("-N {}\n", chain), true)?;
                Ok(CommandStatus::SUCCESS)
            }
            EbtCommand::AppendRule { ns, file, chain, rule } => {
                let rule = normalize_rule(rule)?;
                let staged = self.staged(ns);
                if staged.find_chain(ns.as_str(), chain).is_none() {
                    return Ok(REJECTED);
                }
                staged.add_rule(ns.as_str(), chain, &rule)?;
                write_file(file, &format!("-A {} {}\n", chain, rule), true)?;
                Ok(CommandStatus::SUCCESS)
            }
            EbtCommand::AtomicCommit { ns, file } => {
                if !file.exists() {
                    return Ok(REJECTED);
                }
                let staged = self.staged(ns).clone();
                self.live.insert(ns, staged);
                Ok(CommandStatus::SUCCESS)
            }
            EbtCommand::AtomicSave { ns, file } => {
                let live = self.live_mut(ns).clone();
                write_file(file, &render_listing(&live), false)?;
                self.saved.insert(ns, live);
                Ok(CommandStatus::SUCCESS)
            }
            EbtCommand::List { ns, dest, append, .. } => {
                let listing = self.saved.get(&ns).map(render_listing).unwrap_or_default();
                write_file(dest, &listing, append)?;
                Ok(CommandStatus::SUCCESS)
            }
        }
    }
}

fn builtin_rules(ns: Namespace) -> RuleSet {
    let mut rules = RuleSet::new();
    // Names are static and non-empty; nothing here can fail short of OOM.
    let _ = rules.add_table(ns.as_str());
    for chain in ns.builtin_chains() {
        let _ = rules.add_chain(ns.as_str(), chain, "ACCEPT", "");
    }
    rules
}

fn write_file(path: &Path, contents: &str, append: bool) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(contents.as_bytes()))
        .map_err(|e| Error::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_publishes_staged_chains() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("filter");
        let prefix = CommandPrefix::default();
        let mut mock = MockEbtables::new();

        for cmd in [
            EbtCommand::AtomicInit { ns: Namespace::Filter, file: &file },
            EbtCommand::NewChain { ns: Namespace::Filter, file: &file, chain: "LOGDROP" },
            EbtCommand::AppendRule { ns: Namespace::Filter, file: &file, chain: "FORWARD", rule: "-j LOGDROP" },
        ] {
            assert!(mock.run(&prefix, &cmd).expect("run").success());
        }
        assert!(mock.live(Namespace::Filter).unwrap().find_chain("filter", "LOGDROP").is_none());

        let commit = EbtCommand::AtomicCommit { ns: Namespace::Filter, file: &file };
        assert!(mock.run(&prefix, &commit).expect("run").success());
        let live = mock.live(Namespace::Filter).unwrap();
        assert!(live.find_rule("filter", "FORWARD", "-j LOGDROP").is_some());

        let staged = std::fs::read_to_string(&file).expect("read");
        assert_eq!(staged, "-N LOGDROP\n-A FORWARD -j LOGDROP\n");
    }

    #[test]
    fn rules_for_unknown_chains_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("filter");
        let mut mock = MockEbtables::new();
        let cmd = EbtCommand::AppendRule { ns: Namespace::Filter, file: &file, chain: "NOPE", rule: "-j DROP" };
        assert_eq!(mock.run(&CommandPrefix::default(), &cmd).expect("run"), REJECTED);
    }

    #[test]
    fn configured_failures_are_recorded_but_not_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("nat");
        let mut mock = MockEbtables::new().fail_matching("-t nat --atomic-commit");
        let cmd = EbtCommand::AtomicCommit { ns: Namespace::Nat, file: &file };

        assert!(!mock.run(&CommandPrefix::default(), &cmd).expect("run").success());
        assert_eq!(mock.calls().len(), 1);
    }

    #[test]
    fn quoted_rules_are_stored_as_listed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("filter");
        let prefix = CommandPrefix::default();
        let mut mock = MockEbtables::new();

        for cmd in [
            EbtCommand::AtomicInit { ns: Namespace::Filter, file: &file },
            EbtCommand::AppendRule {
                ns: Namespace::Filter,
                file: &file,
                chain: "FORWARD",
                rule: "--log-prefix 'EUCA DROP'  -j DROP",
            },
            EbtCommand::AtomicCommit { ns: Namespace::Filter, file: &file },
        ] {
            assert!(mock.run(&prefix, &cmd).expect("run").success());
        }

        let live = mock.live(Namespace::Filter).unwrap();
        assert!(live.find_rule("filter", "FORWARD", "--log-prefix \"EUCA DROP\" -j DROP").is_some());
    }
}
