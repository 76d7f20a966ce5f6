//! ebtables gateway: the shell-out surface the handler drives.

use pw_core::exec;
use pw_core::{CommandPrefix, CommandStatus, Error, Result};
use std::fmt;
use std::path::Path;

/// ebtables table namespaces a transaction is staged for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Filter,
    Nat,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Filter, Namespace::Nat];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Filter => "filter",
            Namespace::Nat => "nat",
        }
    }

    pub fn for_table(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ns| ns.as_str() == name)
    }

    pub fn builtin_chains(self) -> &'static [&'static str] {
        match self {
            Namespace::Filter => &["INPUT", "FORWARD", "OUTPUT"],
            Namespace::Nat => &["PREROUTING", "OUTPUT", "POSTROUTING"],
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ebtables invocation. All but `Probe` operate on an atomic file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbtCommand<'a> {
    /// `-L`: used as a health check during init
    Probe,
    AtomicInit { ns: Namespace, file: &'a Path },
    NewChain { ns: Namespace, file: &'a Path, chain: &'a str },
    AppendRule { ns: Namespace, file: &'a Path, chain: &'a str, rule: &'a str },
    AtomicCommit { ns: Namespace, file: &'a Path },
    AtomicSave { ns: Namespace, file: &'a Path },
    /// Human-readable dump of an atomic file, written to `dest`
    List { ns: Namespace, file: &'a Path, dest: &'a Path, append: bool },
}

impl EbtCommand<'_> {
    /// Full argv after the program name. Rule text is split the way a shell
    /// would, so quoted values such as `--log-prefix "EUCA DROP"` stay whole.
    pub fn args(&self) -> Result<Vec<String>> {
        let mut args = self.head();
        if let EbtCommand::AppendRule { rule, .. } = *self {
            args.extend(rule_words(rule)?);
        }
        Ok(args)
    }

    /// Everything but the rule words.
    fn head(&self) -> Vec<String> {
        let atomic = |ns: Namespace, file: &Path, op: &[&str]| {
            let mut args = vec![
                "--atomic-file".to_string(),
                file.display().to_string(),
                "-t".to_string(),
                ns.to_string(),
            ];
            args.extend(op.iter().map(|word| word.to_string()));
            args
        };

        match *self {
            EbtCommand::Probe => vec!["-L".to_string()],
            EbtCommand::AtomicInit { ns, file } => atomic(ns, file, &["--atomic-init"]),
            EbtCommand::NewChain { ns, file, chain } => atomic(ns, file, &["-N", chain]),
            EbtCommand::AppendRule { ns, file, chain, .. } => atomic(ns, file, &["-A", chain]),
            EbtCommand::AtomicCommit { ns, file } => atomic(ns, file, &["--atomic-commit"]),
            EbtCommand::AtomicSave { ns, file } => atomic(ns, file, &["--atomic-save"]),
            EbtCommand::List { ns, file, .. } => atomic(ns, file, &["-L"]),
        }
    }
}

/// Splits rule text into arguments, honouring shell quoting.
pub fn rule_words(rule: &str) -> Result<Vec<String>> {
    shlex::split(rule)
        .ok_or_else(|| Error::InvalidArgument(format!("unbalanced quoting in rule: {}", rule)))
}

/// Rule text as `ebtables -L` prints it: single spaces, values containing
/// blanks in double quotes.
pub fn normalize_rule(rule: &str) -> Result<String> {
    let words: Vec<String> = rule_words(rule)?
        .into_iter()
        .map(|word| {
            if word.contains(char::is_whitespace) {
                format!("\"{}\"", word)
            } else {
                word
            }
        })
        .collect();
    Ok(words.join(" "))
}

impl fmt::Display for EbtCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.head().join(" "))?;
        if let EbtCommand::AppendRule { rule, .. } = self {
            write!(f, " {}", rule)?;
        }
        Ok(())
    }
}

pub trait EbtBackend {
    /// Program name as it appears in logged command lines
    fn program(&self) -> &str;

    /// Runs one command. `Err` is reserved for local I/O around the command
    /// (e.g. opening a `List` destination) and for rule text that cannot be
    /// split into arguments; a failing command is a non-zero status.
    fn run(&mut self, prefix: &CommandPrefix, command: &EbtCommand<'_>) -> Result<CommandStatus>;

    fn command_line(&self, prefix: &CommandPrefix, command: &EbtCommand<'_>) -> String {
        if prefix.is_empty() {
            format!("{} {}", self.program(), command)
        } else {
            format!("{} {} {}", prefix.as_str(), self.program(), command)
        }
    }
}

/// Runs the real `ebtables` binary
#[derive(Debug, Clone)]
pub struct ShellEbtables {
    program: String,
}

impl ShellEbtables {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for ShellEbtables {
    fn default() -> Self {
        Self::new("ebtables")
    }
}

impl EbtBackend for ShellEbtables {
    fn program(&self) -> &str {
        &self.program
    }

    fn run(&mut self, prefix: &CommandPrefix, command: &EbtCommand<'_>) -> Result<CommandStatus> {
        let mut cmd = prefix.command(&self.program);
        cmd.args(command.args()?);

        match *command {
            EbtCommand::List { dest, append, .. } => exec::run_to_file(&mut cmd, dest, append),
            _ => Ok(exec::run_quiet(&mut cmd)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_text_is_split_into_arguments() {
        let file = Path::new("/tmp/pw_ebt_filter_file-abc123");
        let cmd = EbtCommand::AppendRule {
            ns: Namespace::Filter,
            file,
            chain: "FORWARD",
            rule: "-p IPv4  --ip-dst 10.0.0.0/24 -j ACCEPT",
        };
        assert_eq!(
            cmd.args().expect("args"),
            [
                "--atomic-file",
                "/tmp/pw_ebt_filter_file-abc123",
                "-t",
                "filter",
                "-A",
                "FORWARD",
                "-p",
                "IPv4",
                "--ip-dst",
                "10.0.0.0/24",
                "-j",
                "ACCEPT",
            ]
        );
    }

    #[test]
    fn quoted_rule_values_stay_whole() {
        let file = Path::new("/tmp/filter");
        let cmd = EbtCommand::AppendRule {
            ns: Namespace::Filter,
            file,
            chain: "LOGDROP",
            rule: "--log-level info --log-prefix \"EUCA DROP\" -j DROP",
        };
        let args = cmd.args().expect("args");
        assert!(args.iter().any(|arg| arg == "EUCA DROP"));
        assert_eq!(&args[args.len() - 2..], ["-j", "DROP"]);
        assert_eq!(
            cmd.to_string(),
            "--atomic-file /tmp/filter -t filter -A LOGDROP --log-level info --log-prefix \"EUCA DROP\" -j DROP"
        );
    }

    #[test]
    fn unbalanced_quotes_are_invalid() {
        let file = Path::new("/tmp/filter");
        let cmd = EbtCommand::AppendRule {
            ns: Namespace::Filter,
            file,
            chain: "LOGDROP",
            rule: "--log-prefix \"EUCA -j DROP",
        };
        assert!(matches!(cmd.args(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn normalized_rules_match_listing_layout() {
        assert_eq!(
            normalize_rule("--log-prefix  'EUCA DROP'   -j DROP").expect("normalize"),
            "--log-prefix \"EUCA DROP\" -j DROP"
        );
    }

    #[test]
    fn command_line_includes_prefix_and_program() {
        let backend = ShellEbtables::default();
        let file = Path::new("/tmp/nat");
        let cmd = EbtCommand::AtomicCommit {
            ns: Namespace::Nat,
            file,
        };

        assert_eq!(
            backend.command_line(&CommandPrefix::parse("sudo"), &cmd),
            "sudo ebtables --atomic-file /tmp/nat -t nat --atomic-commit"
        );
        assert_eq!(
            backend.command_line(&CommandPrefix::default(), &EbtCommand::Probe),
            "ebtables -L"
        );
    }

    #[test]
    fn only_filter_and_nat_are_namespaces() {
        assert_eq!(Namespace::for_table("nat"), Some(Namespace::Nat));
        assert_eq!(Namespace::for_table("broute"), None);
    }

    #[test]
    fn missing_binary_is_not_run() {
        let mut backend = ShellEbtables::new("/nonexistent/ebtables");
        let status = backend
            .run(&CommandPrefix::default(), &EbtCommand::Probe)
            .expect("run");
        assert_eq!(status, CommandStatus::NOT_RUN);
    }
}
