//! Installed-state report for `status`.

use std::fmt;
use std::path::{Path, PathBuf};

use semver::Version;

use crate::component::ComponentRecord;
use crate::error::EngineResult;
use crate::install::tree_digest;

/// How the live install compares to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    /// Live content matches the recorded digest.
    Intact,
    /// Files were changed since install.
    Modified,
    /// The install path is gone.
    Missing,
}

impl DiskState {
    /// Compare the tree at `path` against `recorded_hash`.
    pub fn inspect(path: &Path, recorded_hash: &str) -> Self {
        if std::fs::symlink_metadata(path).is_err() {
            return Self::Missing;
        }
        match tree_digest(path) {
            Ok(actual) if actual == recorded_hash => Self::Intact,
            _ => Self::Modified,
        }
    }
}

impl fmt::Display for DiskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intact => write!(f, "intact"),
            Self::Modified => write!(f, "modified"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Status of one component.
#[derive(Debug)]
pub struct StatusEntry {
    pub name: String,
    pub installed_version: Option<Version>,
    pub install_path: PathBuf,
    /// `None` when nothing is installed or the install is unmanaged.
    pub disk: Option<DiskState>,
    /// Newest version in the registry, or why it could not be determined.
    pub latest: EngineResult<Version>,
    /// Registry releases newer than the installed version.
    pub newer_releases: usize,
    /// `false` for an install found on disk but absent from the manifest.
    pub managed: bool,
}

impl StatusEntry {
    /// Build the entry for `record`, hashing its live install.
    pub fn inspect(
        record: &ComponentRecord,
        latest: EngineResult<Version>,
        newer_releases: usize,
    ) -> Self {
        let disk = match (&record.installed_version, &record.content_hash) {
            (Some(_), Some(hash)) => Some(DiskState::inspect(&record.install_path, hash)),
            _ => None,
        };
        Self {
            name: record.name.clone(),
            installed_version: record.installed_version.clone(),
            install_path: record.install_path.clone(),
            disk,
            latest,
            newer_releases,
            managed: true,
        }
    }

    /// Entry for an install at `path` that shellup did not put there.
    pub fn unmanaged(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        latest: EngineResult<Version>,
    ) -> Self {
        Self {
            name: name.into(),
            installed_version: None,
            install_path: path.into(),
            disk: None,
            latest,
            newer_releases: 0,
            managed: false,
        }
    }

    /// Whether the registry has a newer release.
    ///
    /// Always `false` for unmanaged installs, whose version is unknown.
    pub fn update_available(&self) -> bool {
        if !self.managed {
            return false;
        }
        match (&self.installed_version, &self.latest) {
            (Some(installed), Ok(latest)) => latest > installed,
            (None, Ok(_)) => true,
            _ => false,
        }
    }
}
