//! Staged, atomic promotion of verified artifacts.
//!
//! # Layout
//!
//! All scratch paths live next to the target so every swap is a rename on
//! one filesystem:
//!
//! ```text
//! <parent>/<target>                    live install
//! <parent>/.<name>.staging-XXXXXX/     unpacked artifact, pre-promotion
//! <parent>/.<name>.backup              previous install, until committed
//! <parent>/.<name>.trash-<id>          being deleted
//! ```
//!
//! A backup only exists between [`Installer::apply`] and
//! [`AppliedInstall::commit`] / [`AppliedInstall::rollback`]. Finding one on
//! startup means a run died in between; [`Installer::recover`] resolves it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::archive::stage_artifact;
use super::digest::tree_digest;
use super::fs::{path_exists, Filesystem, StdFilesystem};
use crate::component::ArtifactFormat;
use crate::error::{EngineError, EngineResult};

static TRASH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Installs artifacts into live locations.
#[derive(Clone)]
pub struct Installer {
    fs: Arc<dyn Filesystem>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer").finish_non_exhaustive()
    }
}

impl Default for Installer {
    fn default() -> Self {
        Self::new(Arc::new(StdFilesystem))
    }
}

/// What [`Installer::recover`] found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// No interrupted install.
    Clean,
    /// The live install matched the manifest; the stale backup was discarded.
    KeptInstalled,
    /// The live install did not match the manifest; the backup was restored.
    RestoredBackup,
}

/// Receipt for a promoted install.
///
/// The previous install is kept aside until the caller either commits
/// (after recording the new state) or rolls back.
#[must_use = "an applied install must be committed or rolled back"]
pub struct AppliedInstall {
    name: String,
    target: PathBuf,
    backup: Option<PathBuf>,
    content_hash: String,
    fs: Arc<dyn Filesystem>,
}

impl std::fmt::Debug for AppliedInstall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppliedInstall")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("backup", &self.backup)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

impl Installer {
    pub fn new(fs: Arc<dyn Filesystem>) -> Self {
        Self { fs }
    }

    /// Backup path for component `name` installed at `target`.
    pub fn backup_path(name: &str, target: &Path) -> PathBuf {
        parent_of(target).join(format!(".{}.backup", name))
    }

    fn staging_prefix(name: &str) -> String {
        format!(".{}.staging-", name)
    }

    fn trash_prefix(name: &str) -> String {
        format!(".{}.trash-", name)
    }

    fn trash_path(name: &str, target: &Path) -> PathBuf {
        let id = TRASH_COUNTER.fetch_add(1, Ordering::Relaxed);
        parent_of(target).join(format!(
            "{}{}-{}",
            Self::trash_prefix(name),
            std::process::id(),
            id
        ))
    }

    /// Unpack `artifact` next to `target` and swap it into place.
    ///
    /// On failure the previous install is back in place before the error
    /// is returned. If it cannot be put back, the error is `RollbackFailed`.
    pub fn apply(
        &self,
        name: &str,
        artifact: &Path,
        format: ArtifactFormat,
        file_name: &str,
        target: &Path,
    ) -> EngineResult<AppliedInstall> {
        match fs::metadata(artifact) {
            Ok(meta) if meta.len() > 0 => {}
            Ok(_) => return Err(staging_error(artifact, "artifact is empty")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(staging_error(artifact, "artifact does not exist"))
            }
            Err(e) => return Err(EngineError::io(artifact, e)),
        }

        let parent = parent_of(target);
        self.fs
            .create_dir_all(&parent)
            .map_err(|e| EngineError::io(&parent, e))?;

        let backup = Self::backup_path(name, target);
        if path_exists(&backup) {
            return Err(staging_error(
                &backup,
                "a backup from an interrupted install is still present",
            ));
        }

        // Dropping the TempDir removes whatever is left of staging.
        let staging = tempfile::Builder::new()
            .prefix(&Self::staging_prefix(name))
            .tempdir_in(&parent)
            .map_err(|e| EngineError::io(&parent, e))?;
        debug!(component = name, staging = %staging.path().display(), "staging artifact");

        let root = stage_artifact(artifact, format, file_name, &staging.path().join("content"))?;
        let content_hash = tree_digest(&root)?;

        let had_previous = path_exists(target);
        if had_previous {
            self.fs
                .rename(target, &backup)
                .map_err(|e| EngineError::io(target, e))?;
            debug!(component = name, backup = %backup.display(), "moved previous install aside");
        }

        if let Err(e) = self.fs.rename(&root, target) {
            let err = EngineError::io(target, e);
            if had_previous {
                self.fs.rename(&backup, target).map_err(|restore| {
                    EngineError::RollbackFailed {
                        target: target.to_path_buf(),
                        backup: backup.clone(),
                        reason: format!("{} (after: {})", restore, err),
                    }
                })?;
                warn!(component = name, error = %err, "promotion failed, previous install restored");
            }
            return Err(err);
        }

        info!(component = name, target = %target.display(), "promoted new install");
        Ok(AppliedInstall {
            name: name.to_string(),
            target: target.to_path_buf(),
            backup: had_previous.then_some(backup),
            content_hash,
            fs: Arc::clone(&self.fs),
        })
    }

    /// Resolve leftovers of an interrupted run for component `name`.
    ///
    /// Stale staging and trash directories are deleted. A leftover backup
    /// is discarded if the live tree matches `recorded_hash`, and restored
    /// otherwise.
    pub fn recover(
        &self,
        name: &str,
        target: &Path,
        recorded_hash: Option<&str>,
    ) -> EngineResult<Recovery> {
        self.sweep(name, target);

        let backup = Self::backup_path(name, target);
        if !path_exists(&backup) {
            return Ok(Recovery::Clean);
        }

        let live_matches = match recorded_hash {
            Some(expected) if path_exists(target) => match tree_digest(target) {
                Ok(actual) => actual == expected,
                Err(e) => {
                    warn!(component = name, error = %e, "cannot hash live install during recovery");
                    false
                }
            },
            _ => false,
        };

        if live_matches {
            warn!(
                component = name,
                backup = %backup.display(),
                "found backup from interrupted run; live install matches manifest, discarding backup"
            );
            discard(self.fs.as_ref(), name, target, &backup);
            return Ok(Recovery::KeptInstalled);
        }

        warn!(
            component = name,
            backup = %backup.display(),
            "found backup from interrupted run; restoring previous install"
        );
        restore(self.fs.as_ref(), name, target, &backup)?;
        Ok(Recovery::RestoredBackup)
    }

    /// Delete stale staging and trash directories of `name`.
    fn sweep(&self, name: &str, target: &Path) {
        let parent = parent_of(target);
        let entries = match fs::read_dir(&parent) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        let staging = Self::staging_prefix(name);
        let trash = Self::trash_prefix(name);
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if !file_name.starts_with(&staging) && !file_name.starts_with(&trash) {
                continue;
            }
            let path = entry.path();
            match self.fs.remove_all(&path) {
                Ok(()) => debug!(component = name, path = %path.display(), "removed stale leftover"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(component = name, path = %path.display(), error = %e, "cannot remove leftover")
                }
            }
        }
    }
}

impl AppliedInstall {
    /// Digest of the promoted tree.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Discard the previous install.
    ///
    /// Failures only leave garbage behind, which the next startup sweep or
    /// recovery removes, so they are logged rather than returned.
    pub fn commit(self) {
        if let Some(backup) = &self.backup {
            discard(self.fs.as_ref(), &self.name, &self.target, backup);
        }
        debug!(component = %self.name, "install committed");
    }

    /// Undo the install, putting the previous one (if any) back.
    pub fn rollback(self) -> EngineResult<()> {
        let failed = |reason: String| EngineError::RollbackFailed {
            target: self.target.clone(),
            backup: self
                .backup
                .clone()
                .unwrap_or_else(|| Installer::backup_path(&self.name, &self.target)),
            reason,
        };

        match &self.backup {
            Some(backup) => {
                restore(self.fs.as_ref(), &self.name, &self.target, backup)?;
            }
            None => {
                let trash = Installer::trash_path(&self.name, &self.target);
                self.fs
                    .rename(&self.target, &trash)
                    .map_err(|e| failed(format!("cannot move new install aside: {}", e)))?;
                remove_trash(self.fs.as_ref(), &self.name, &trash);
            }
        }

        warn!(component = %self.name, target = %self.target.display(), "install rolled back");
        Ok(())
    }
}

/// Put `backup` back at `target`, removing whatever is there now.
fn restore(fs: &dyn Filesystem, name: &str, target: &Path, backup: &Path) -> EngineResult<()> {
    let failed = |reason: String| EngineError::RollbackFailed {
        target: target.to_path_buf(),
        backup: backup.to_path_buf(),
        reason,
    };

    if path_exists(target) {
        let trash = Installer::trash_path(name, target);
        fs.rename(target, &trash)
            .map_err(|e| failed(format!("cannot move current install aside: {}", e)))?;
        remove_trash(fs, name, &trash);
    }

    fs.rename(backup, target)
        .map_err(|e| failed(format!("cannot restore backup: {}", e)))
}

/// Delete a backup that is no longer needed.
fn discard(fs: &dyn Filesystem, name: &str, target: &Path, backup: &Path) {
    let trash = Installer::trash_path(name, target);
    match fs.rename(backup, &trash) {
        Ok(()) => remove_trash(fs, name, &trash),
        Err(e) => warn!(component = name, backup = %backup.display(), error = %e, "cannot discard backup"),
    }
}

fn remove_trash(fs: &dyn Filesystem, name: &str, trash: &Path) {
    if let Err(e) = fs.remove_all(trash) {
        warn!(component = name, path = %trash.display(), error = %e, "cannot remove old install");
    }
}

fn parent_of(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn staging_error(path: &Path, reason: &str) -> EngineError {
    EngineError::Staging {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}
