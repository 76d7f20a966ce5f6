//! Private working files used to stage backend transactions.
//!
//! A working file keeps its path for the lifetime of the owning handler:
//! it is created once with a random suffix, then truncated (or recreated)
//! in place on every re-initialization.

use crate::error::{Error, Result};
use std::fs::{self, OpenOptions, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const PRIVATE_MODE: u32 = 0o600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFile {
    path: PathBuf,
}

impl WorkFile {
    /// Creates `<dir>/<stem>-XXXXXX` readable by the owner only.
    pub fn create(dir: &Path, stem: &str) -> Result<Self> {
        let prefix = format!("{}-", stem);
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(6)
            .tempfile_in(dir)
            .map_err(|e| Error::io(dir, e))?;

        let path = temp
            .into_temp_path()
            .keep()
            .map_err(|e| Error::io(dir, e.error))?;

        if let Err(e) = fs::set_permissions(&path, Permissions::from_mode(PRIVATE_MODE)) {
            let _ = fs::remove_file(&path);
            return Err(Error::io(path, e));
        }

        debug!(path = %path.display(), "created working file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Empties the file, recreating it if a previous transaction removed it.
    pub fn truncate(&self) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(PRIVATE_MODE)
            .open(&self.path)
            .map(|_| ())
            .map_err(|e| Error::io(&self.path, e))
    }

    /// Replaces the file's contents, keeping it private.
    pub fn write(&self, contents: &str) -> Result<()> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(PRIVATE_MODE)
            .open(&self.path)
            .and_then(|mut file| file.write_all(contents.as_bytes()))
            .map_err(|e| Error::io(&self.path, e))
    }

    pub fn read(&self) -> Result<String> {
        let bytes = fs::read(&self.path).map_err(|e| Error::io(&self.path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Removes the file; the path stays reserved for the next truncate.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove working file");
            }
        }
    }

    /// Copies the file aside so a failed transaction can be retried by hand.
    pub fn preserve(&self, dest: &Path) -> Result<()> {
        fs::copy(&self.path, dest)
            .map(|_| ())
            .map_err(|e| Error::io(dest, e))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}

/// Truncates every file, removing the whole group if any one fails.
pub fn truncate_all(files: &[&WorkFile]) -> Result<()> {
    for file in files {
        if let Err(e) = file.truncate() {
            remove_all(files);
            return Err(e);
        }
    }
    Ok(())
}

pub fn remove_all(files: &[&WorkFile]) {
    files.iter().for_each(|file| file.remove());
}
