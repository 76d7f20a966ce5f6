use crate::backend::{IpsCommand, IpsetBackend};
use crate::handler::{IpsHandler, uninitialized};
use crate::model::{HOST_PREFIX, SetBase};
use pw_core::{Error, ParseSummary, Result};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::{debug, error, info, warn};

static CREATE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^create\s+(\S+)").expect("create pattern is valid"));

// Member token is digits, dots and slashes; anything after it is ignored.
static ADD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^add\s+(\S+)\s+([0-9./]+)").expect("add pattern is valid"));

/// Reads `ipset save` output into `sets`. Bad lines are logged and dropped.
pub fn load_save(sets: &mut SetBase, text: &str) -> Result<ParseSummary> {
    let mut summary = ParseSummary::default();

    for raw in text.lines() {
        let line = raw.trim_end();
        if line.is_empty() {
            continue;
        }

        let outcome = if let Some(caps) = CREATE_LINE.captures(line) {
            sets.add_set(&caps[1])
        } else if let Some(caps) = ADD_LINE.captures(line) {
            let (address, prefix) = match caps[2].split_once('/') {
                Some((address, prefix)) => (address, prefix.parse::<u8>().ok()),
                None => (&caps[2], Some(HOST_PREFIX)),
            };
            match prefix {
                Some(prefix) if prefix <= HOST_PREFIX && !address.is_empty() => {
                    sets.add_network(&caps[1], address, prefix)
                }
                _ => Err(Error::InvalidArgument(format!("bad member: {}", &caps[2]))),
            }
        } else {
            warn!(line, "unknown line in ipset save output, skipping");
            summary.dropped += 1;
            continue;
        };

        match outcome {
            Ok(()) => summary.accepted += 1,
            Err(e @ Error::OutOfMemory(_)) => return Err(e),
            Err(e) => {
                warn!(line, error = %e, "could not add ipset save entry, skipping");
                summary.dropped += 1;
            }
        }
    }

    Ok(summary)
}

impl<B: IpsetBackend> IpsHandler<B> {
    /// Replaces the model with what ipset currently holds.
    pub fn repopulate(&mut self) -> Result<ParseSummary> {
        self.file()?;
        let started = Instant::now();
        self.reset()?;

        let file = self.file.as_ref().ok_or_else(uninitialized)?;
        let command = IpsCommand::Save { dest: file.path() };
        let status = self.backend.run(&self.prefix, &command)?;
        if !status.success() {
            let line = self.backend.command_line(&self.prefix, &command);
            error!(command = %line, %status, "could not save current ipset state");
            return Err(Error::BackendCommandFailed { command: line, status });
        }

        let text = file.read()?;
        let summary = match load_save(&mut self.sets, &text) {
            Ok(summary) => summary,
            Err(e) => {
                self.sets.clear();
                return Err(e);
            }
        };

        debug!(accepted = summary.accepted, dropped = summary.dropped, "parsed ipset save output");
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "ipset sets re-populated");
        Ok(summary)
    }
}
