//! Error types for the update engine.
//!
//! Every failure the engine can surface is an [`EngineError`]. Errors are
//! classified into an [`ErrorKind`] so callers can decide whether to retry,
//! keep going with the rest of a batch, or stop everything.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use semver::Version;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while installing or updating components.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// The manifest exists but cannot be read back into the expected shape.
    #[error("manifest {} is corrupt: {reason}", .path.display())]
    CorruptManifest { path: PathBuf, reason: String },

    /// Another invocation holds the manifest lock.
    #[error(
        "manifest {} is locked by another shellup process (waited {waited_secs}s)",
        .path.display()
    )]
    ManifestLocked { path: PathBuf, waited_secs: u64 },

    /// The feed does not list the component.
    #[error("component '{name}' is not listed in the registry feed")]
    ComponentNotFound { name: String },

    /// An exact version was requested but the feed does not carry it.
    #[error("component '{name}' has no release {version}")]
    NoMatchingVersion { name: String, version: Version },

    /// `update` was requested for a component that was never installed.
    #[error("component '{name}' is not installed; run 'shellup install {name}' first")]
    NotInstalled { name: String },

    /// Transport failure. Retryable.
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("request to {url} failed with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// The registry feed was fetched but could not be parsed.
    #[error("malformed registry feed {url}: {reason}")]
    Feed { url: String, reason: String },

    /// Downloaded bytes do not hash to the expected digest.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    /// The transfer size disagrees with the size announced by the feed.
    #[error("size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },

    /// The local filesystem ran out of space.
    #[error("disk full while writing {}", .path.display())]
    DiskFull { path: PathBuf },

    /// Any other local I/O failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// Extracting or copying the artifact into staging failed.
    #[error("staging failed for {}: {reason}", .path.display())]
    Staging { path: PathBuf, reason: String },

    /// The process lacks permission to touch a path.
    #[error("permission denied: {}", .path.display())]
    PermissionDenied { path: PathBuf },

    /// A failed install could not be undone. The filesystem needs manual repair.
    #[error(
        "rollback failed: could not restore {} from {}: {reason}; manual intervention required",
        .target.display(),
        .backup.display()
    )]
    RollbackFailed {
        target: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An error attributed to a single component.
    #[error("{name}: {source}")]
    Component {
        name: String,
        #[source]
        source: Box<EngineError>,
    },
}

/// Classification of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ComponentNotFound,
    NoMatchingVersion,
    NotInstalled,
    NetworkError,
    Feed,
    IntegrityMismatch,
    DiskFull,
    IoError,
    StagingError,
    PermissionDenied,
    RollbackFailed,
    ManifestLocked,
    CorruptManifest,
    Config,
}

impl ErrorKind {
    /// Short stable name used in reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ComponentNotFound => "ComponentNotFound",
            Self::NoMatchingVersion => "NoMatchingVersion",
            Self::NotInstalled => "NotInstalled",
            Self::NetworkError => "NetworkError",
            Self::Feed => "FeedError",
            Self::IntegrityMismatch => "IntegrityMismatch",
            Self::DiskFull => "DiskFull",
            Self::IoError => "IOError",
            Self::StagingError => "StagingError",
            Self::PermissionDenied => "PermissionDenied",
            Self::RollbackFailed => "RollbackFailed",
            Self::ManifestLocked => "ManifestLocked",
            Self::CorruptManifest => "CorruptManifest",
            Self::Config => "ConfigError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl EngineError {
    /// Map an I/O error on `path` to the matching engine error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::StorageFull => Self::DiskFull { path },
            _ => Self::Io {
                path,
                source: Arc::new(source),
            },
        }
    }

    /// Attach a component name to this error.
    ///
    /// Errors that already carry a component are returned unchanged.
    pub fn for_component(self, name: impl Into<String>) -> Self {
        match self {
            Self::Component { .. } => self,
            other => Self::Component {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// The component this error is attributed to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Component { name, .. } => Some(name),
            Self::ComponentNotFound { name }
            | Self::NoMatchingVersion { name, .. }
            | Self::NotInstalled { name } => Some(name),
            _ => None,
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CorruptManifest { .. } => ErrorKind::CorruptManifest,
            Self::ManifestLocked { .. } => ErrorKind::ManifestLocked,
            Self::ComponentNotFound { .. } => ErrorKind::ComponentNotFound,
            Self::NoMatchingVersion { .. } => ErrorKind::NoMatchingVersion,
            Self::NotInstalled { .. } => ErrorKind::NotInstalled,
            Self::Network { .. } | Self::HttpStatus { .. } => ErrorKind::NetworkError,
            Self::Feed { .. } => ErrorKind::Feed,
            Self::IntegrityMismatch { .. } | Self::SizeMismatch { .. } => {
                ErrorKind::IntegrityMismatch
            }
            Self::DiskFull { .. } => ErrorKind::DiskFull,
            Self::Io { .. } => ErrorKind::IoError,
            Self::Staging { .. } => ErrorKind::StagingError,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::RollbackFailed { .. } => ErrorKind::RollbackFailed,
            Self::Config(_) => ErrorKind::Config,
            Self::Component { source, .. } => source.kind(),
        }
    }

    /// Transient errors worth another attempt.
    ///
    /// Client errors (4xx other than 429) are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Component { source, .. } => source.is_retryable(),
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            other => other.kind() == ErrorKind::NetworkError,
        }
    }

    /// Errors after which the engine must stop touching the filesystem.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::RollbackFailed
    }

    /// Errors that end the whole invocation rather than one component.
    pub fn is_engine_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RollbackFailed
                | ErrorKind::ManifestLocked
                | ErrorKind::CorruptManifest
                | ErrorKind::Config
        )
    }
}
