use crate::backend::{IpsCommand, IpsetBackend};
use crate::model::{IpSet, SetBase};
use ipnet::Ipv4Net;
use pw_core::{CommandPrefix, Error, HandlerConfig, IpsetConfig, Result, SetStatus, WorkFile};
use tracing::{Level, debug, error, trace};

const WORK_STEM: &str = "pw_ips_file";

/// Owns the address-set model and pushes it to ipset.
#[derive(Debug)]
pub struct IpsHandler<B: IpsetBackend> {
    pub(crate) config: HandlerConfig,
    pub(crate) ipset: IpsetConfig,
    pub(crate) backend: B,
    pub(crate) prefix: CommandPrefix,
    pub(crate) file: Option<WorkFile>,
    pub(crate) sets: SetBase,
}

impl<B: IpsetBackend> IpsHandler<B> {
    pub fn new(config: HandlerConfig, ipset: IpsetConfig, backend: B) -> Self {
        Self {
            config,
            ipset,
            backend,
            prefix: CommandPrefix::default(),
            file: None,
            sets: SetBase::new(),
        }
    }

    /// Prepares the working file and checks that ipset can be run.
    ///
    /// A re-init empties the existing file in place instead of creating a new one.
    pub fn init(&mut self, cmd_prefix: &str) -> Result<()> {
        let file = match self.file.take() {
            Some(file) => {
                file.truncate().inspect_err(|_| file.remove())?;
                file
            }
            None => WorkFile::create(&self.config.work_dir, WORK_STEM)?,
        };

        self.sets.clear();
        self.prefix = CommandPrefix::parse(cmd_prefix);

        let probe = IpsCommand::Probe;
        let status = self.backend.run(&self.prefix, &probe).inspect_err(|_| file.remove())?;
        if !status.success() {
            let command = self.backend.command_line(&self.prefix, &probe);
            error!(
                command = %command,
                %status,
                "could not execute required ipset shell-out: check command/permissions"
            );
            file.remove();
            return Err(Error::BackendUnavailable { command, status });
        }

        debug!(file = %file.path().display(), "ipset handler initialized");
        self.file = Some(file);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.file.is_some()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.file()?.remove();
        let prefix = self.prefix.as_str().to_string();
        self.sets.clear();
        self.init(&prefix)
    }

    pub fn close(&mut self) -> Result<()> {
        self.file()?;
        if let Some(file) = self.file.take() {
            file.remove();
        }
        self.sets.clear();
        debug!("ipset handler closed");
        Ok(())
    }

    pub fn sets(&self) -> &SetBase {
        &self.sets
    }

    pub fn ipset_config(&self) -> &IpsetConfig {
        &self.ipset
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn add_set(&mut self, set: &str) -> Result<()> {
        self.file()?;
        self.sets.add_set(set)
    }

    pub fn add_network(&mut self, set: &str, address: &str, prefix: u8) -> Result<()> {
        self.file()?;
        self.sets.add_network(set, address, prefix)
    }

    pub fn add_address(&mut self, set: &str, address: &str) -> Result<()> {
        self.file()?;
        self.sets.add_address(set, address)
    }

    pub fn find_set(&self, set: &str) -> Result<Option<&IpSet>> {
        self.file()?;
        Ok(self.sets.find_set(set))
    }

    pub fn find_network(&self, set: &str, address: &str, prefix: u8) -> Result<Option<&Ipv4Net>> {
        self.file()?;
        Ok(self.sets.find_network(set, address, prefix))
    }

    pub fn find_address(&self, set: &str, address: &str) -> Result<Option<&Ipv4Net>> {
        self.file()?;
        Ok(self.sets.find_address(set, address))
    }

    pub fn flush_set(&mut self, set: &str) -> Result<()> {
        self.file()?;
        self.sets.flush_set(set)
    }

    pub fn delete_sets_matching(&mut self, pattern: &str) -> Result<usize> {
        self.file()?;
        self.sets.delete_sets_matching(pattern)
    }

    pub fn status(&self) -> Vec<SetStatus> {
        self.sets.set_status()
    }

    pub fn log_state(&self) -> Result<()> {
        self.file()?;
        if tracing::enabled!(Level::TRACE) {
            for set in self.sets.sets() {
                trace!(set = set.name(), refs = set.ref_count(), "set");
                for network in set.networks() {
                    trace!(set = set.name(), %network, "network");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn file(&self) -> Result<&WorkFile> {
        self.file.as_ref().ok_or_else(uninitialized)
    }
}

pub(crate) fn uninitialized() -> Error {
    Error::InvalidArgument("ipset handler is not initialized".to_string())
}

impl<B: IpsetBackend> Drop for IpsHandler<B> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            file.remove();
        }
    }
}
