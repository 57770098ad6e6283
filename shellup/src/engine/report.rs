//! Per-component results of an engine run.

use std::fmt;

use semver::Version;

use crate::error::{EngineError, ErrorKind};

/// Process exit code for a clean run.
pub const EXIT_SUCCESS: i32 = 0;
/// Process exit code when at least one component failed.
pub const EXIT_COMPONENT_FAILED: i32 = 1;
/// Process exit code for a fatal engine error.
pub const EXIT_FATAL: i32 = 2;

/// What happened to one component.
#[derive(Debug)]
pub enum Outcome {
    Installed { version: Version },
    Upgraded { from: Version, to: Version },
    Downgraded { from: Version, to: Version },
    UpToDate { version: Version },
    Blocked { reason: String },
    Failed { error: EngineError },
    /// Not attempted because the run was halted.
    Skipped,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Whether the component's files changed.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Installed { .. } | Self::Upgraded { .. } | Self::Downgraded { .. }
        )
    }

    /// Error kind of a failed outcome.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failed { error } => Some(error.kind()),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { version } => write!(f, "installed {}", version),
            Self::Upgraded { from, to } => write!(f, "upgraded {} -> {}", from, to),
            Self::Downgraded { from, to } => write!(f, "downgraded {} -> {}", from, to),
            Self::UpToDate { version } => write!(f, "up to date ({})", version),
            Self::Blocked { reason } => write!(f, "blocked: {}", reason),
            Self::Failed { error } => write!(f, "failed [{}]: {}", error.kind(), error),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result for one component.
#[derive(Debug)]
pub struct ComponentReport {
    pub name: String,
    pub outcome: Outcome,
}

impl ComponentReport {
    pub fn new(name: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            name: name.into(),
            outcome,
        }
    }
}

/// Result of a batch run.
///
/// A run halted by a fatal error still lists every component: the fatal
/// one as failed, those not yet started as skipped.
#[derive(Debug, Default)]
pub struct RunReport {
    pub components: Vec<ComponentReport>,
}

impl RunReport {
    /// Look up a component's report.
    pub fn get(&self, name: &str) -> Option<&ComponentReport> {
        self.components.iter().find(|c| c.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ComponentReport> {
        self.components.iter().filter(|c| c.outcome.is_failure())
    }

    pub fn changed(&self) -> usize {
        self.components
            .iter()
            .filter(|c| c.outcome.is_change())
            .count()
    }

    /// The error that halted the run, if any.
    pub fn fatal_error(&self) -> Option<&EngineError> {
        self.components.iter().find_map(|c| match &c.outcome {
            Outcome::Failed { error } if error.is_fatal() => Some(error),
            _ => None,
        })
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.fatal_error().is_some() {
            EXIT_FATAL
        } else if self.failures().next().is_some() {
            EXIT_COMPONENT_FAILED
        } else {
            EXIT_SUCCESS
        }
    }
}
