use crate::exec::CommandStatus;
use std::collections::TryReserveError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors shared by the rule-table and address-set handlers
#[derive(Debug, Error)]
pub enum Error {
    /// Uninitialized handler or a missing required argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Working file could not be created, chmod-ed, opened or read
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Health probe exited non-zero during init
    #[error("backend unavailable: '{command}' exited with {status}")]
    BackendUnavailable {
        command: String,
        status: CommandStatus,
    },

    /// A transaction or restore command exited non-zero
    #[error("backend command failed: '{command}' exited with {status}")]
    BackendCommandFailed {
        command: String,
        status: CommandStatus,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Appends to a model collection, surfacing allocation failure instead of aborting.
pub fn try_push<T>(items: &mut Vec<T>, item: T) -> Result<()> {
    items.try_reserve(1)?;
    items.push(item);
    Ok(())
}

/// Rejects empty names before they reach the model.
pub fn require(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}
