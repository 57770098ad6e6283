//! Registry access: which versions of a component exist and where to get them.

mod client;
mod feed;

pub use client::{FeedRegistryClient, RegistryClient, StaticRegistry};
pub use feed::{Feed, FeedComponent, FeedRelease};

use std::fmt;

use semver::Version;

/// Which release of a component is wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// The highest available release.
    Latest,
    /// Exactly this version.
    Exact(Version),
}

impl VersionConstraint {
    /// Whether the caller asked for a specific version.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl From<Option<Version>> for VersionConstraint {
    fn from(version: Option<Version>) -> Self {
        version.map_or(Self::Latest, Self::Exact)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(v) => write!(f, "={}", v),
        }
    }
}
