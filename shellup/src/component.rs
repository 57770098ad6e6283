//! Core component types shared by the manifest, registry and engine.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Locally recorded state of one component.
///
/// A record with an `installed_version` always carries the `content_hash`
/// of the tree that was installed; the manifest store enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Stable component key (e.g. "shell").
    pub name: String,

    /// Installed version, absent if the component was never installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<Version>,

    /// SHA-256 digest of the installed tree (see [`crate::install::tree_digest`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    /// SHA-256 digest of the artifact the install was made from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,

    /// Absolute install location.
    pub install_path: PathBuf,

    /// When the current version was installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

impl ComponentRecord {
    /// Create a record for a component that is not installed yet.
    pub fn new(name: impl Into<String>, install_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            installed_version: None,
            content_hash: None,
            artifact_hash: None,
            install_path: install_path.into(),
            installed_at: None,
        }
    }

    /// Create a record for a verified install.
    pub fn installed(
        name: impl Into<String>,
        install_path: impl Into<PathBuf>,
        version: Version,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            installed_version: Some(version),
            content_hash: Some(content_hash.into()),
            installed_at: Some(Utc::now()),
            ..Self::new(name, install_path)
        }
    }

    /// Set the artifact digest (builder pattern).
    pub fn with_artifact_hash(mut self, hash: impl Into<String>) -> Self {
        self.artifact_hash = Some(hash.into());
        self
    }

    /// Whether a verified install is recorded.
    pub fn is_installed(&self) -> bool {
        self.installed_version.is_some()
    }
}

/// Layout of a downloadable artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactFormat {
    /// Gzip-compressed tar archive. A single top-level directory is stripped.
    #[default]
    #[serde(rename = "tar.gz", alias = "tgz")]
    TarGz,

    /// A single file copied into the install directory.
    #[serde(rename = "file")]
    File,
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TarGz => write!(f, "tar.gz"),
            Self::File => write!(f, "file"),
        }
    }
}

/// One downloadable release of a component, as announced by the feed.
///
/// Produced by the registry per query and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDescriptor {
    /// Component this release belongs to.
    pub component: String,
    /// Release version.
    pub version: Version,
    /// Where to download the artifact from.
    pub download_url: String,
    /// Expected SHA-256 digest of the artifact (hex, any case).
    pub expected_hash: String,
    /// Expected artifact size in bytes.
    pub size_bytes: u64,
    /// Artifact layout.
    pub format: ArtifactFormat,
}

impl ReleaseDescriptor {
    /// File name component of the download URL, used for single-file artifacts.
    pub fn file_name(&self) -> &str {
        let trimmed = self
            .download_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .trim_end_matches('/');
        match trimmed.rsplit('/').next() {
            Some(name) if !name.is_empty() => name,
            _ => self.component.as_str(),
        }
    }
}
