//! Temporary file replacement that survives crashes.
//!
//! Some test variants swap a game file (a config, a texture pack) for the
//! duration of a test. The original is moved aside and a sentinel records
//! what happened, so a later run can put things back if this one died.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ControlError, ControlResult};

const SENTINEL_SUFFIX: &str = ".demoknight-lock";
const BACKUP_SUFFIX: &str = ".demoknight-backup";

#[derive(Debug, Serialize, Deserialize)]
struct Sentinel {
    target: PathBuf,
    had_original: bool,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// Keeps a file replaced until dropped or restored.
#[derive(Debug)]
pub struct FileGuard {
    target: PathBuf,
    had_original: bool,
    restored: bool,
}

impl FileGuard {
    /// Sentinel path for `target`.
    #[must_use]
    pub fn sentinel_path(target: &Path) -> PathBuf {
        with_suffix(target, SENTINEL_SUFFIX)
    }

    fn backup_path(target: &Path) -> PathBuf {
        with_suffix(target, BACKUP_SUFFIX)
    }

    /// Replace `target` with `contents`.
    ///
    /// Leftovers from a crashed run are recovered first.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if any filesystem step fails. Steps already
    /// taken are recorded in the sentinel.
    pub fn replace(target: impl Into<PathBuf>, contents: &[u8]) -> ControlResult<Self> {
        let target = target.into();
        Self::recover_stale(&target)?;

        let had_original = target.exists();
        let sentinel = Sentinel {
            target: target.clone(),
            had_original,
        };
        let encoded = serde_json::to_vec(&sentinel)
            .map_err(|err| ControlError::invalid_configuration(format!("sentinel: {err}")))?;
        fs::write(Self::sentinel_path(&target), encoded)?;

        let guard = Self {
            target,
            had_original,
            restored: false,
        };
        if had_original {
            fs::rename(&guard.target, Self::backup_path(&guard.target))?;
        }
        fs::write(&guard.target, contents)?;
        info!(target = %guard.target.display(), "Swapped file in");
        Ok(guard)
    }

    /// Replace `target` with a copy of `source`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `source` cannot be read or the swap fails.
    pub fn replace_with_file(target: impl Into<PathBuf>, source: &Path) -> ControlResult<Self> {
        let contents = fs::read(source)?;
        Self::replace(target, &contents)
    }

    /// Path being guarded.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Put the original back now.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the original cannot be restored. The sentinel
    /// is left in place so [`recover_stale`](Self::recover_stale) can retry.
    pub fn restore(mut self) -> ControlResult<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> ControlResult<()> {
        if self.restored {
            return Ok(());
        }
        put_back(&self.target, self.had_original)?;
        self.restored = true;
        info!(target = %self.target.display(), "Restored file");
        Ok(())
    }

    /// Undo a swap left behind by a run that never restored it.
    ///
    /// Returns whether anything was recovered.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sentinel is unreadable or the restore fails.
    pub fn recover_stale(target: &Path) -> ControlResult<bool> {
        let sentinel_path = Self::sentinel_path(target);
        let raw = match fs::read(&sentinel_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let sentinel: Sentinel = serde_json::from_slice(&raw).map_err(|err| {
            ControlError::invalid_configuration(format!(
                "corrupt sentinel {}: {err}",
                sentinel_path.display()
            ))
        })?;

        warn!(target = %sentinel.target.display(), "Recovering file left swapped by an earlier run");
        put_back(target, sentinel.had_original)?;
        Ok(true)
    }
}

/// Restore `target` from its backup and drop the sentinel.
fn put_back(target: &Path, had_original: bool) -> ControlResult<()> {
    let backup = FileGuard::backup_path(target);
    if had_original {
        if backup.exists() {
            fs::rename(&backup, target)?;
        }
        // No backup means the crash happened before the original moved.
    } else {
        remove_if_present(target)?;
    }
    remove_if_present(&FileGuard::sentinel_path(target))?;
    Ok(())
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        if let Err(err) = self.restore_inner() {
            warn!(target = %self.target.display(), error = %err, "Failed to restore file");
        }
    }
}
