use crate::backend::{EbtBackend, EbtCommand, Namespace};
use crate::handler::{EbtHandler, uninitialized};
use pw_core::{CommandStatus, Error, Result};
use serde::Serialize;
use tracing::{error, info, warn};

/// What a deploy pushed through the atomic files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    /// `-N` and `-A` commands that succeeded
    pub staged: usize,
    /// `-N` and `-A` commands that exited non-zero; the commit still ran
    pub staging_failures: usize,
    /// Tables with no ebtables namespace, left out of the transaction
    pub skipped_tables: Vec<String>,
}

impl<B: EbtBackend> EbtHandler<B> {
    /// Pushes the model to ebtables as one atomic transaction per namespace.
    ///
    /// Only referenced chains are created, and only their rules are appended.
    /// Both commits are always attempted; if either fails its atomic file is
    /// copied into the recovery directory and the first failure is returned.
    /// All working files are removed afterwards.
    pub fn deploy(&mut self) -> Result<DeployReport> {
        if self.files.is_none() {
            return Err(uninitialized());
        }
        self.rules.update_refcounts();

        let Self {
            backend,
            prefix,
            files,
            rules,
            config,
        } = self;
        let files = files.as_ref().ok_or_else(uninitialized)?;

        for ns in Namespace::ALL {
            let command = EbtCommand::AtomicInit {
                ns,
                file: files.atomic(ns).path(),
            };
            let status = backend.run(prefix, &command)?;
            if !status.success() {
                let command = backend.command_line(prefix, &command);
                error!(command = %command, %status, "could not initialize ebtables atomic file");
                return Err(Error::BackendCommandFailed { command, status });
            }
        }

        let mut report = DeployReport::default();
        let mut stage = |backend: &mut B, command: EbtCommand<'_>| -> Result<()> {
            match backend.run(prefix, &command) {
                Ok(status) if status.success() => report.staged += 1,
                Ok(status) => {
                    report.staging_failures += 1;
                    warn!(command = %backend.command_line(prefix, &command), %status, "ebtables staging command failed");
                }
                Err(e @ Error::InvalidArgument(_)) => {
                    report.staging_failures += 1;
                    warn!(command = %backend.command_line(prefix, &command), error = %e, "ebtables staging command not run");
                }
                Err(e) => return Err(e),
            }
            Ok(())
        };

        for table in rules.tables() {
            let Some(ns) = Namespace::for_table(table.name()) else {
                continue;
            };
            let file = files.atomic(ns).path();
            let live = || table.chains().iter().filter(|chain| chain.is_deployable());

            for chain in live().filter(|chain| !chain.is_builtin()) {
                stage(backend, EbtCommand::NewChain { ns, file, chain: chain.name() })?;
            }
            for chain in live() {
                for rule in chain.rules() {
                    stage(
                        backend,
                        EbtCommand::AppendRule {
                            ns,
                            file,
                            chain: chain.name(),
                            rule: rule.as_str(),
                        },
                    )?;
                }
            }
        }

        for table in rules.tables() {
            if Namespace::for_table(table.name()).is_none() {
                warn!(table = table.name(), "table has no ebtables namespace, not deploying it");
                report.skipped_tables.push(table.name().to_string());
            }
        }

        let mut failure: Option<(String, CommandStatus)> = None;
        for ns in Namespace::ALL {
            let file = files.atomic(ns);
            let command = EbtCommand::AtomicCommit { ns, file: file.path() };
            let status = backend.run(prefix, &command)?;
            if !status.success() {
                let line = backend.command_line(prefix, &command);
                let copy = config.recovery_path(&format!("pw_ebt_{}_file_failed", ns));
                error!(
                    command = %line,
                    %status,
                    "failed to commit ebtables transaction: copying failed input file to {} for manual retry",
                    copy.display()
                );
                if let Err(e) = file.preserve(&copy) {
                    error!(error = %e, "could not copy failed ebtables input file");
                }
                if failure.is_none() {
                    failure = Some((line, status));
                }
            }
            file.remove();
        }
        files.ascii.remove();

        if let Some((command, status)) = failure {
            return Err(Error::BackendCommandFailed { command, status });
        }

        info!(
            staged = report.staged,
            staging_failures = report.staging_failures,
            "ebtables rules deployed"
        );
        Ok(report)
    }
}
