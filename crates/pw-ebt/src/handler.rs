use crate::backend::{EbtBackend, EbtCommand, Namespace};
use crate::model::{Chain, Rule, RuleSet, Table};
use pw_core::workfile;
use pw_core::{CommandPrefix, Error, HandlerConfig, Result, TableStatus, WorkFile};
use std::path::Path;
use tracing::{Level, debug, error, trace};

const FILTER_STEM: &str = "pw_ebt_filter_file";
const NAT_STEM: &str = "pw_ebt_nat_file";
const ASCII_STEM: &str = "pw_ebt_asc_file";

/// Transaction files: one atomic file per namespace plus the text dump.
#[derive(Debug)]
pub(crate) struct EbtFiles {
    pub(crate) filter: WorkFile,
    pub(crate) nat: WorkFile,
    pub(crate) ascii: WorkFile,
}

impl EbtFiles {
    fn create(dir: &Path) -> Result<Self> {
        let filter = WorkFile::create(dir, FILTER_STEM)?;
        let nat = WorkFile::create(dir, NAT_STEM).inspect_err(|_| filter.remove())?;
        let ascii = WorkFile::create(dir, ASCII_STEM).inspect_err(|_| {
            filter.remove();
            nat.remove();
        })?;
        Ok(Self { filter, nat, ascii })
    }

    pub(crate) fn atomic(&self, ns: Namespace) -> &WorkFile {
        match ns {
            Namespace::Filter => &self.filter,
            Namespace::Nat => &self.nat,
        }
    }

    pub(crate) fn all(&self) -> [&WorkFile; 3] {
        [&self.filter, &self.nat, &self.ascii]
    }
}

/// Owns the bridge rule-table model and pushes it to ebtables.
///
/// Every operation except [`EbtHandler::init`] refuses to run until the
/// handler has been initialized.
#[derive(Debug)]
pub struct EbtHandler<B: EbtBackend> {
    pub(crate) config: HandlerConfig,
    pub(crate) backend: B,
    pub(crate) prefix: CommandPrefix,
    pub(crate) files: Option<EbtFiles>,
    pub(crate) rules: RuleSet,
}

impl<B: EbtBackend> EbtHandler<B> {
    pub fn new(config: HandlerConfig, backend: B) -> Self {
        Self {
            config,
            backend,
            prefix: CommandPrefix::default(),
            files: None,
            rules: RuleSet::new(),
        }
    }

    /// Prepares working files and checks that ebtables can be run.
    ///
    /// Re-initializing keeps the existing file paths and empties them. On a
    /// failed probe the files are removed and the handler stays uninitialized.
    pub fn init(&mut self, cmd_prefix: &str) -> Result<()> {
        let files = match self.files.take() {
            Some(files) => {
                workfile::truncate_all(&files.all())?;
                files
            }
            None => EbtFiles::create(&self.config.work_dir)?,
        };

        self.rules.clear();
        self.prefix = CommandPrefix::parse(cmd_prefix);

        let probe = EbtCommand::Probe;
        let status = self
            .backend
            .run(&self.prefix, &probe)
            .inspect_err(|_| workfile::remove_all(&files.all()))?;
        if !status.success() {
            let command = self.backend.command_line(&self.prefix, &probe);
            error!(
                command = %command,
                %status,
                "could not execute required ebtables shell-out: check command/permissions"
            );
            workfile::remove_all(&files.all());
            return Err(Error::BackendUnavailable { command, status });
        }

        debug!(
            filter = %files.filter.path().display(),
            nat = %files.nat.path().display(),
            ascii = %files.ascii.path().display(),
            "ebtables handler initialized"
        );
        self.files = Some(files);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.files.is_some()
    }

    /// Drops the model and re-initializes with the same prefix and file paths.
    pub fn reset(&mut self) -> Result<()> {
        let files = self.files()?;
        workfile::remove_all(&files.all());

        let prefix = self.prefix.as_str().to_string();
        self.rules.clear();
        self.init(&prefix)
    }

    /// Drops the model and removes the working files.
    pub fn close(&mut self) -> Result<()> {
        self.files()?;
        if let Some(files) = self.files.take() {
            workfile::remove_all(&files.all());
        }
        self.rules.clear();
        debug!("ebtables handler closed");
        Ok(())
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn prefix(&self) -> &CommandPrefix {
        &self.prefix
    }

    pub fn add_table(&mut self, table: &str) -> Result<()> {
        self.files()?;
        self.rules.add_table(table)
    }

    pub fn add_chain(&mut self, table: &str, chain: &str, policy: &str, counters: &str) -> Result<()> {
        self.files()?;
        self.rules.add_chain(table, chain, policy, counters)
    }

    pub fn add_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        self.files()?;
        self.rules.add_rule(table, chain, rule)
    }

    pub fn find_table(&self, table: &str) -> Result<Option<&Table>> {
        self.files()?;
        Ok(self.rules.find_table(table))
    }

    pub fn find_chain(&self, table: &str, chain: &str) -> Result<Option<&Chain>> {
        self.files()?;
        Ok(self.rules.find_chain(table, chain))
    }

    pub fn find_rule(&self, table: &str, chain: &str, rule: &str) -> Result<Option<&Rule>> {
        self.files()?;
        Ok(self.rules.find_rule(table, chain, rule))
    }

    pub fn update_refcounts(&mut self) -> Result<()> {
        self.files()?;
        self.rules.update_refcounts();
        Ok(())
    }

    pub fn prune_first_empty_chain(&mut self, table: &str) -> Result<Option<String>> {
        self.files()?;
        self.rules.prune_first_empty_chain(table)
    }

    pub fn delete_chains_matching(&mut self, table: &str, pattern: &str) -> Result<usize> {
        self.files()?;
        self.rules.delete_chains_matching(table, pattern)
    }

    pub fn flush_chain(&mut self, table: &str, chain: &str) -> Result<()> {
        self.files()?;
        self.rules.flush_chain(table, chain)
    }

    pub fn flush_rule(&mut self, table: &str, chain: &str, rule: &str) -> Result<()> {
        self.files()?;
        self.rules.flush_rule(table, chain, rule)
    }

    pub fn status(&self) -> Vec<TableStatus> {
        self.rules.table_status()
    }

    /// Dumps the whole model at trace level.
    pub fn log_state(&self) -> Result<()> {
        self.files()?;
        if !tracing::enabled!(Level::TRACE) {
            return Ok(());
        }

        for table in self.rules.tables() {
            trace!(table = table.name(), "table");
            for chain in table.chains() {
                trace!(
                    table = table.name(),
                    chain = chain.name(),
                    policy = chain.policy(),
                    counters = chain.counters(),
                    refs = chain.ref_count(),
                    "chain"
                );
                for rule in chain.rules() {
                    trace!(chain = chain.name(), rule = rule.as_str(), "rule");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn files(&self) -> Result<&EbtFiles> {
        self.files.as_ref().ok_or_else(uninitialized)
    }
}

pub(crate) fn uninitialized() -> Error {
    Error::InvalidArgument("ebtables handler is not initialized".to_string())
}

impl<B: EbtBackend> Drop for EbtHandler<B> {
    fn drop(&mut self) {
        if let Some(files) = self.files.take() {
            workfile::remove_all(&files.all());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEbtables;
    use pw_core::CommandStatus;

    fn handler(dir: &Path) -> EbtHandler<MockEbtables> {
        let mut handler = EbtHandler::new(HandlerConfig::in_dir(dir), MockEbtables::new());
        handler.init("").expect("init");
        handler
    }

    #[test]
    fn init_creates_private_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(dir.path());
        let files = handler.files().expect("initialized");

        for (file, stem) in files.all().into_iter().zip([FILTER_STEM, NAT_STEM, ASCII_STEM]) {
            assert!(file.exists());
            let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with(stem));
        }
        assert_eq!(handler.backend().calls(), ["-L"]);
    }

    #[test]
    fn failed_probe_leaves_handler_uninitialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = EbtHandler::new(HandlerConfig::in_dir(dir.path()), MockEbtables::new().fail_probe());

        let err = handler.init("sudo").unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable { .. }));
        assert!(!handler.is_initialized());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// Backend whose every run fails locally.
    struct Unrunnable;

    impl EbtBackend for Unrunnable {
        fn program(&self) -> &str {
            "ebtables"
        }

        fn run(&mut self, _prefix: &CommandPrefix, _command: &EbtCommand<'_>) -> Result<CommandStatus> {
            Err(Error::io("/dev/null", std::io::Error::other("cannot run")))
        }
    }

    #[test]
    fn probe_error_removes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = EbtHandler::new(HandlerConfig::in_dir(dir.path()), Unrunnable);

        assert!(matches!(handler.init(""), Err(Error::Io { .. })));
        assert!(!handler.is_initialized());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn uninitialized_handler_rejects_operations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = EbtHandler::new(HandlerConfig::in_dir(dir.path()), MockEbtables::new());

        assert!(matches!(handler.add_table("filter"), Err(Error::InvalidArgument(_))));
        assert!(matches!(handler.find_table("filter"), Err(Error::InvalidArgument(_))));
        assert!(matches!(handler.reset(), Err(Error::InvalidArgument(_))));
        assert!(matches!(handler.close(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn reset_keeps_paths_and_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = EbtHandler::new(HandlerConfig::in_dir(dir.path()), MockEbtables::new());
        handler.init("sudo -n").expect("init");
        handler.add_table("filter").unwrap();
        let before: Vec<_> = handler.files().unwrap().all().iter().map(|f| f.path().to_path_buf()).collect();

        handler.reset().expect("reset");
        let after: Vec<_> = handler.files().unwrap().all().iter().map(|f| f.path().to_path_buf()).collect();

        assert_eq!(before, after);
        assert!(handler.rules().is_empty());
        assert_eq!(handler.prefix().as_str(), "sudo -n");
        assert!(handler.files().unwrap().all().iter().all(|f| f.exists()));
    }

    #[test]
    fn close_removes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = handler(dir.path());
        handler.close().expect("close");

        assert!(!handler.is_initialized());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn drop_removes_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        drop(handler(dir.path()));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn mutations_go_through_to_the_model() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = handler(dir.path());
        handler.add_table("filter").unwrap();
        handler.add_chain("filter", "FORWARD", "ACCEPT", "").unwrap();
        handler.add_rule("filter", "FORWARD", "-j ACCEPT").unwrap();

        assert!(handler.find_rule("filter", "FORWARD", "-j ACCEPT").unwrap().is_some());
        handler.flush_rule("filter", "FORWARD", "-j ACCEPT").unwrap();
        assert!(handler.find_rule("filter", "FORWARD", "-j ACCEPT").unwrap().is_none());
        handler.log_state().unwrap();
    }
}
