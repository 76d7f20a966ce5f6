use crate::backend::{IpsCommand, IpsetBackend};
use crate::handler::{IpsHandler, uninitialized};
use crate::model::SetBase;
use pw_core::{Error, IpsetConfig, Result};
use std::fmt::Write;
use tracing::{error, info};

/// Builds the `ipset restore` script for the model.
///
/// Referenced sets are recreated, flushed and refilled. Unreferenced sets are
/// destroyed when `dodelete` is set and left out of the script otherwise.
pub fn render_restore(sets: &SetBase, ipset: &IpsetConfig, dodelete: bool) -> String {
    let options = ipset.create_options();
    let mut out = String::new();

    for set in sets.sets() {
        if set.ref_count() > 0 {
            let _ = writeln!(out, "create {} {}", set.name(), options);
            let _ = writeln!(out, "flush {}", set.name());
            for network in set.networks() {
                let _ = writeln!(out, "add {} {}", set.name(), network);
            }
        } else if dodelete {
            let _ = writeln!(out, "create {} {}", set.name(), options);
            let _ = writeln!(out, "flush {}", set.name());
            let _ = writeln!(out, "destroy {}", set.name());
        }
    }
    out
}

impl<B: IpsetBackend> IpsHandler<B> {
    /// Writes the restore script and replays it with `ipset -! restore`.
    ///
    /// On failure the script is copied into the recovery directory. The
    /// working file is removed either way.
    pub fn deploy(&mut self, dodelete: bool) -> Result<()> {
        let file = self.file.as_ref().ok_or_else(uninitialized)?;
        file.write(&render_restore(&self.sets, &self.ipset, dodelete))?;

        let command = IpsCommand::Restore { src: file.path() };
        let outcome = self.backend.run(&self.prefix, &command);
        let result = match outcome {
            Ok(status) if status.success() => {
                info!(sets = self.sets.sets().len(), dodelete, "ipset sets deployed");
                Ok(())
            }
            Ok(status) => {
                let line = self.backend.command_line(&self.prefix, &command);
                let copy = self.config.recovery_path("pw_ips_file_failed");
                error!(
                    command = %line,
                    %status,
                    "failed to restore ipset sets: copying failed input file to {} for manual retry",
                    copy.display()
                );
                if let Err(e) = file.preserve(&copy) {
                    error!(error = %e, "could not copy failed ipset input file");
                }
                Err(Error::BackendCommandFailed { command: line, status })
            }
            Err(e) => Err(e),
        };

        file.remove();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockIpset;
    use pw_core::HandlerConfig;
    use std::path::Path;

    fn handler(dir: &Path, backend: MockIpset) -> IpsHandler<MockIpset> {
        let mut handler = IpsHandler::new(HandlerConfig::in_dir(dir), IpsetConfig::default(), backend);
        handler.init("").expect("init");
        handler
    }

    fn sg_123(handler: &mut IpsHandler<MockIpset>) {
        handler.add_set("sg-123").unwrap();
        handler.add_network("sg-123", "10.0.0.0", 24).unwrap();
        handler.add_network("sg-123", "10.0.1.5", 32).unwrap();
        handler.add_set("sg-empty").unwrap();
        handler.flush_set("sg-empty").unwrap();
    }

    const CREATE: &str = "hash:net family inet hashsize 2048 maxelem 65536";

    #[test]
    fn deploy_emits_referenced_sets_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = handler(dir.path(), MockIpset::new());
        sg_123(&mut handler);

        handler.deploy(false).expect("deploy");
        assert_eq!(
            handler.backend().restored(),
            [
                format!("create sg-123 {}", CREATE),
                "flush sg-123".to_string(),
                "add sg-123 10.0.0.0/24".to_string(),
                "add sg-123 10.0.1.5/32".to_string(),
            ]
        );
    }

    #[test]
    fn dodelete_destroys_unreferenced_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = handler(dir.path(), MockIpset::new());
        handler.add_set("sg-empty").unwrap();
        handler.flush_set("sg-empty").unwrap();

        handler.deploy(true).expect("deploy");
        assert_eq!(
            handler.backend().restored(),
            [
                format!("create sg-empty {}", CREATE),
                "flush sg-empty".to_string(),
                "destroy sg-empty".to_string(),
            ]
        );
    }

    #[test]
    fn deploy_removes_working_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut handler = handler(dir.path(), MockIpset::new());
        sg_123(&mut handler);

        handler.deploy(false).expect("deploy");
        assert!(!handler.file().unwrap().exists());
        assert!(handler.backend().live().find_address("sg-123", "10.0.1.5").is_some());
    }

    #[test]
    fn failed_restore_keeps_a_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let work = dir.path().join("work");
        let recovery = dir.path().join("recovery");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::create_dir_all(&recovery).unwrap();

        let config = HandlerConfig {
            work_dir: work.clone(),
            recovery_dir: recovery.clone(),
        };
        let mut handler = IpsHandler::new(config, IpsetConfig::default(), MockIpset::new().fail_matching("restore"));
        handler.init("").expect("init");
        sg_123(&mut handler);

        let err = handler.deploy(false).unwrap_err();
        assert!(matches!(err, Error::BackendCommandFailed { .. }));

        let copy = std::fs::read_to_string(recovery.join("pw_ips_file_failed")).expect("copy");
        assert!(copy.contains("add sg-123 10.0.0.0/24\n"));
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }
}
