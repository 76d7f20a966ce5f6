use crate::backend::{EbtBackend, EbtCommand, Namespace};
use crate::handler::{EbtHandler, uninitialized};
use crate::model::RuleSet;
use pw_core::{CommandStatus, Error, ParseSummary, Result};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Reads an `ebtables -L` dump line by line into `rules`.
///
/// Unrecognized lines are logged and dropped; only allocation failure aborts.
pub fn load_listing(rules: &mut RuleSet, text: &str) -> Result<ParseSummary> {
    let mut summary = ParseSummary::default();
    let mut table = String::new();
    let mut chain = String::new();

    for raw in text.lines() {
        let line = raw.trim_end_matches(['\r', ' ']);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let outcome = if let Some(rest) = line.strip_prefix("Bridge table:") {
            table = rest.split_whitespace().next().unwrap_or_default().to_string();
            rules.add_table(&table)
        } else if let Some(rest) = line.strip_prefix("Bridge chain:") {
            let rest = rest.trim_start();
            chain = rest.split(',').next().unwrap_or_default().trim().to_string();
            let policy = rest.split_whitespace().last().unwrap_or_default();
            rules.add_chain(&table, &chain, policy, "")
        } else if line.starts_with('-') {
            rules.add_rule(&table, &chain, line)
        } else {
            warn!(line, "unknown line in ebtables listing, skipping");
            summary.dropped += 1;
            continue;
        };

        match outcome {
            Ok(()) => summary.accepted += 1,
            Err(e @ Error::OutOfMemory(_)) => return Err(e),
            Err(e) => {
                warn!(line, error = %e, "could not add ebtables listing entry, skipping");
                summary.dropped += 1;
            }
        }
    }

    Ok(summary)
}

impl<B: EbtBackend> EbtHandler<B> {
    /// Saves live ebtables state into the atomic files and lists both
    /// namespaces into the text dump, filter first.
    pub fn system_save(&mut self) -> Result<()> {
        let files = self.files.as_ref().ok_or_else(uninitialized)?;
        let mut failure: Option<(String, CommandStatus)> = None;

        let saves = Namespace::ALL.map(|ns| EbtCommand::AtomicSave {
            ns,
            file: files.atomic(ns).path(),
        });
        let lists = Namespace::ALL.map(|ns| EbtCommand::List {
            ns,
            file: files.atomic(ns).path(),
            dest: files.ascii.path(),
            append: ns != Namespace::Filter,
        });

        for command in saves.iter().chain(lists.iter()) {
            let status = self.backend.run(&self.prefix, command)?;
            if !status.success() {
                let line = self.backend.command_line(&self.prefix, command);
                error!(command = %line, %status, "ebtables save failed");
                if failure.is_none() {
                    failure = Some((line, status));
                }
            }
        }

        match failure {
            Some((command, status)) => Err(Error::BackendCommandFailed { command, status }),
            None => Ok(()),
        }
    }

    /// Replaces the model with what ebtables currently holds.
    ///
    /// The model is reset first; if the save or parse fails it stays empty.
    pub fn repopulate(&mut self) -> Result<ParseSummary> {
        self.files()?;
        let started = Instant::now();

        self.reset()?;
        self.system_save()?;

        let text = self.files()?.ascii.read()?;

        let summary = match load_listing(&mut self.rules, &text) {
            Ok(summary) => summary,
            Err(e) => {
                self.rules.clear();
                return Err(e);
            }
        };

        debug!(accepted = summary.accepted, dropped = summary.dropped, "parsed ebtables listing");
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ebtables rules re-populated"
        );
        Ok(summary)
    }
}
