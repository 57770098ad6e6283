//! The update engine.
//!
//! One invocation runs through these phases:
//!
//! ```text
//! Idle -> Resolving -> Planning -> Executing -> Persisting -> Done
//! ```
//!
//! The manifest lock is held from the initial load (followed by recovery of
//! interrupted installs) until the manifest is written back. Each changed
//! component keeps its previous install aside until the manifest is
//! persisted, so the manifest and the disk never disagree: if persisting
//! fails, every applied install is rolled back.

mod plan;
mod report;
mod status;

pub use plan::{
    plan_action, Action, ActionPlan, PlannedAction, Resolved, DOWNGRADE_BLOCKED,
};
pub use report::{
    ComponentReport, Outcome, RunReport, EXIT_COMPONENT_FAILED, EXIT_FATAL, EXIT_SUCCESS,
};
pub use status::{DiskState, StatusEntry};

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use semver::Version;
use tracing::{debug, error, info, warn};

use crate::component::ComponentRecord;
use crate::config::{EngineConfig, SHELL_COMPONENT};
use crate::error::{EngineError, EngineResult};
use crate::fetch::{Fetcher, SchemeTransport, Transport};
use crate::install::{AppliedInstall, Installer, Recovery};
use crate::manifest::{LockMode, ManifestLock, ManifestRecord, ManifestStore};
use crate::registry::{FeedRegistryClient, RegistryClient, VersionConstraint};
use crate::retry::RetryPolicy;

/// Engine lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    Planning,
    Executing,
    Persisting,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Persisting => "persisting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A component the caller asked for.
#[derive(Debug, Clone)]
struct Request {
    name: String,
    constraint: VersionConstraint,
    /// `update` semantics: the component must already be installed.
    require_installed: bool,
}

/// Which components a run covers; `AllInstalled` is expanded after the
/// manifest is loaded under the lock.
enum Selection {
    One(Request),
    AllInstalled,
}

/// Result of fetch + apply for one planned action.
enum Execution {
    Applied {
        applied: AppliedInstall,
        artifact_hash: String,
    },
    Failed(EngineError),
    Skipped,
}

/// Orchestrates manifest, registry, fetcher and installer.
pub struct UpdateEngine {
    config: EngineConfig,
    store: ManifestStore,
    registry: Arc<dyn RegistryClient>,
    fetcher: Fetcher,
    installer: Installer,
}

impl fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl UpdateEngine {
    /// Build an engine talking to the configured feed over HTTP or `file://`.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let feed_url = config.require_feed_url()?.to_string();

        let transport: Arc<dyn Transport> = Arc::new(SchemeTransport::new(config.timeout)?);
        let retry = RetryPolicy::exponential(config.retries);

        let registry = FeedRegistryClient::new(feed_url, Arc::clone(&transport))
            .with_retry(retry.clone());
        let fetcher = Fetcher::new(transport, &config.cache_dir).with_retry(retry);

        Ok(Self::new(
            config,
            Arc::new(registry),
            fetcher,
            Installer::default(),
        ))
    }

    /// Build an engine from parts.
    pub fn new(
        config: EngineConfig,
        registry: Arc<dyn RegistryClient>,
        fetcher: Fetcher,
        installer: Installer,
    ) -> Self {
        Self {
            store: ManifestStore::new(&config.manifest_path),
            config,
            registry,
            fetcher,
            installer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Manifest store used by this engine.
    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Install `name`, at `version` if given, else at the latest release.
    ///
    /// An explicit version may be lower than the installed one.
    pub fn install(&self, name: &str, version: Option<Version>) -> EngineResult<ComponentReport> {
        self.run_single(Request {
            name: name.to_string(),
            constraint: version.into(),
            require_installed: false,
        })
    }

    /// Move an installed component to its latest release.
    pub fn update(&self, name: &str) -> EngineResult<ComponentReport> {
        self.run_single(Request {
            name: name.to_string(),
            constraint: VersionConstraint::Latest,
            require_installed: true,
        })
    }

    /// Update every installed component.
    ///
    /// Failures are reported per component and do not stop the batch,
    /// except a failed rollback, which halts it.
    pub fn update_all(&self) -> EngineResult<RunReport> {
        self.run(Selection::AllInstalled)
    }

    /// Installed state of every recorded component.
    pub fn status(&self) -> EngineResult<Vec<StatusEntry>> {
        let _lock = ManifestLock::acquire(
            self.store.path(),
            LockMode::Shared,
            self.config.lock_timeout,
        )?;
        let manifest = self.store.load()?;

        let mut entries: Vec<StatusEntry> = manifest
            .components
            .values()
            .map(|record| {
                let latest = self.latest_version(&record.name);
                let newer = self.count_newer(record);
                StatusEntry::inspect(record, latest, newer)
            })
            .collect();

        if !manifest.components.contains_key(SHELL_COMPONENT) {
            if let Some(path) = self.find_unmanaged_shell() {
                info!(path = %path.display(), "found a shell install not recorded in the manifest");
                entries.push(StatusEntry::unmanaged(
                    SHELL_COMPONENT,
                    path,
                    self.latest_version(SHELL_COMPONENT),
                ));
            }
        }
        Ok(entries)
    }

    fn latest_version(&self, name: &str) -> EngineResult<Version> {
        self.registry
            .resolve(name, &VersionConstraint::Latest)
            .map(|release| release.version)
    }

    /// Registry releases above the installed version; all of them when
    /// nothing is installed, none when the registry is unreachable.
    fn count_newer(&self, record: &ComponentRecord) -> usize {
        let releases = match self.registry.releases(&record.name) {
            Ok(releases) => releases,
            Err(_) => return 0,
        };
        match &record.installed_version {
            Some(installed) => releases.iter().filter(|r| r.version > *installed).count(),
            None => releases.len(),
        }
    }

    /// A shell directory at the configured or a system-wide location.
    fn find_unmanaged_shell(&self) -> Option<PathBuf> {
        std::iter::once(self.config.install_path_for(SHELL_COMPONENT))
            .chain(self.config.system_shell_dirs.iter().cloned())
            .find(|path| path.is_dir())
    }

    fn run_single(&self, request: Request) -> EngineResult<ComponentReport> {
        let name = request.name.clone();
        let report = self.run(Selection::One(request))?;

        let component = report
            .components
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ComponentNotFound { name: name.clone() })?;
        match component.outcome {
            Outcome::Failed { error } => Err(error.for_component(name)),
            _ => Ok(component),
        }
    }

    fn run(&self, selection: Selection) -> EngineResult<RunReport> {
        self.enter(Phase::Idle);
        let _lock = ManifestLock::acquire(
            self.store.path(),
            LockMode::Exclusive,
            self.config.lock_timeout,
        )?;
        let mut manifest = self.store.load()?;

        let requests = match selection {
            Selection::One(request) => vec![request],
            Selection::AllInstalled => manifest
                .installed_names()
                .into_iter()
                .map(|name| Request {
                    name,
                    constraint: VersionConstraint::Latest,
                    require_installed: true,
                })
                .collect(),
        };

        self.recover(&manifest, &requests)?;

        let mut outcomes: Vec<(String, Option<Outcome>)> =
            requests.iter().map(|r| (r.name.clone(), None)).collect();

        self.enter(Phase::Resolving);
        let mut resolved = Vec::with_capacity(requests.len());
        for request in &requests {
            match self.resolve(&manifest, request) {
                Ok(r) => resolved.push(r),
                Err(e) => {
                    warn!(component = %request.name, error = %e, "resolution failed");
                    set_outcome(
                        &mut outcomes,
                        &request.name,
                        Outcome::Failed {
                            error: e.for_component(&request.name),
                        },
                    );
                }
            }
        }

        self.enter(Phase::Planning);
        let plan = ActionPlan::build(&manifest, resolved);
        for planned in plan.actions() {
            debug!(component = %planned.name, action = %planned.action, "planned");
            match &planned.action {
                Action::NoOp { version } => set_outcome(
                    &mut outcomes,
                    &planned.name,
                    Outcome::UpToDate {
                        version: version.clone(),
                    },
                ),
                Action::Blocked { reason } => set_outcome(
                    &mut outcomes,
                    &planned.name,
                    Outcome::Blocked {
                        reason: reason.clone(),
                    },
                ),
                _ => {}
            }
        }

        self.enter(Phase::Executing);
        let pending: Vec<&PlannedAction> = plan.pending().collect();
        let executions = self.execute(&pending);

        let mut applied = Vec::new();
        for (planned, execution) in pending.into_iter().zip(executions) {
            match execution {
                Execution::Applied {
                    applied: receipt,
                    artifact_hash,
                } => applied.push((planned, receipt, artifact_hash)),
                Execution::Failed(e) => {
                    error!(component = %planned.name, error = %e, "install failed");
                    set_outcome(
                        &mut outcomes,
                        &planned.name,
                        Outcome::Failed {
                            error: e.for_component(&planned.name),
                        },
                    );
                }
                Execution::Skipped => set_outcome(&mut outcomes, &planned.name, Outcome::Skipped),
            }
        }

        self.enter(Phase::Persisting);
        if !applied.is_empty() {
            let mut next = manifest.clone();
            for (planned, receipt, artifact_hash) in &applied {
                next.upsert(
                    ComponentRecord::installed(
                        &planned.name,
                        &planned.install_path,
                        planned.release.version.clone(),
                        receipt.content_hash(),
                    )
                    .with_artifact_hash(artifact_hash.as_str()),
                );
            }

            if let Err(e) = self.store.save(&next) {
                error!(error = %e, "cannot persist manifest, rolling back applied installs");
                let mut rollback_error = None;
                for (_, receipt, _) in applied {
                    if let Err(rb) = receipt.rollback() {
                        error!(error = %rb, "rollback failed");
                        rollback_error.get_or_insert(rb);
                    }
                }
                return Err(rollback_error.unwrap_or(e));
            }
            manifest = next;

            for (planned, receipt, _) in applied {
                receipt.commit();
                info!(component = %planned.name, action = %planned.action, "applied");
                set_outcome(&mut outcomes, &planned.name, completed_outcome(&planned.action));
            }
        }

        self.enter(Phase::Done);
        let report = RunReport {
            components: outcomes
                .into_iter()
                .map(|(name, outcome)| {
                    ComponentReport::new(name, outcome.unwrap_or(Outcome::Skipped))
                })
                .collect(),
        };
        info!(
            components = report.components.len(),
            changed = report.changed(),
            failed = report.failures().count(),
            recorded = manifest.components.len(),
            "run complete"
        );
        Ok(report)
    }

    /// Resolve leftovers of interrupted runs before touching anything.
    fn recover(&self, manifest: &ManifestRecord, requests: &[Request]) -> EngineResult<()> {
        let stale = self.fetcher.sweep();
        if stale > 0 {
            info!(files = stale, "removed partial downloads from an interrupted run");
        }

        let mut seen = BTreeSet::new();
        for record in manifest.components.values() {
            seen.insert(record.name.as_str());
            let outcome = self.installer.recover(
                &record.name,
                &record.install_path,
                record.content_hash.as_deref(),
            )?;
            if outcome != Recovery::Clean {
                info!(component = %record.name, ?outcome, "recovered interrupted install");
            }
        }

        for request in requests {
            if seen.contains(request.name.as_str()) || validate_name(&request.name).is_err() {
                continue;
            }
            let target = self.config.install_path_for(&request.name);
            self.installer.recover(&request.name, &target, None)?;
        }
        Ok(())
    }

    fn resolve(&self, manifest: &ManifestRecord, request: &Request) -> EngineResult<Resolved> {
        validate_name(&request.name)?;

        let record = manifest.get(&request.name).filter(|r| r.is_installed());
        if request.require_installed && record.is_none() {
            return Err(EngineError::NotInstalled {
                name: request.name.clone(),
            });
        }

        let release = self.registry.resolve(&request.name, &request.constraint)?;
        debug!(
            component = %request.name,
            constraint = %request.constraint,
            version = %release.version,
            "resolved"
        );

        Ok(Resolved {
            name: request.name.clone(),
            explicit: request.constraint.is_exact(),
            install_path: record
                .map(|r| r.install_path.clone())
                .unwrap_or_else(|| self.config.install_path_for(&request.name)),
            release,
        })
    }

    /// Fetch and apply `pending` on a bounded pool of scoped threads.
    ///
    /// Results line up with `pending`. After a fatal error, actions that
    /// have not started yet are skipped.
    fn execute(&self, pending: &[&PlannedAction]) -> Vec<Execution> {
        let total = pending.len();
        if total == 0 {
            return Vec::new();
        }

        let workers = self.config.max_concurrency.clamp(1, total);
        let next = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let results: Mutex<Vec<Option<Execution>>> =
            Mutex::new((0..total).map(|_| None).collect());

        let work = || loop {
            let index = next.fetch_add(1, Ordering::SeqCst);
            if index >= total {
                break;
            }

            let execution = if halted.load(Ordering::SeqCst) {
                Execution::Skipped
            } else {
                match self.fetch_and_apply(pending[index]) {
                    Ok(execution) => execution,
                    Err(e) => {
                        if e.is_fatal() {
                            error!(component = %pending[index].name, error = %e, "halting run");
                            halted.store(true, Ordering::SeqCst);
                        }
                        Execution::Failed(e)
                    }
                }
            };

            let mut slots = match results.lock() {
                Ok(slots) => slots,
                Err(poisoned) => poisoned.into_inner(),
            };
            slots[index] = Some(execution);
        };

        if workers == 1 {
            work();
        } else {
            debug!(workers, actions = total, "running actions in parallel");
            thread::scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(&work);
                }
            });
        }

        let slots = match results.into_inner() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Execution::Skipped))
            .collect()
    }

    fn fetch_and_apply(&self, planned: &PlannedAction) -> EngineResult<Execution> {
        let release = &planned.release;
        info!(component = %planned.name, action = %planned.action, "starting");

        let artifact = self.fetcher.fetch(release)?;
        let applied = self.installer.apply(
            &planned.name,
            artifact.path(),
            release.format,
            release.file_name(),
            &planned.install_path,
        )?;

        Ok(Execution::Applied {
            applied,
            artifact_hash: artifact.sha256().to_string(),
        })
    }

    fn enter(&self, phase: Phase) {
        debug!(%phase, "engine phase");
    }
}

fn completed_outcome(action: &Action) -> Outcome {
    match action {
        Action::Install { to } => Outcome::Installed { version: to.clone() },
        Action::Upgrade { from, to } => Outcome::Upgraded {
            from: from.clone(),
            to: to.clone(),
        },
        Action::Downgrade { from, to } => Outcome::Downgraded {
            from: from.clone(),
            to: to.clone(),
        },
        Action::NoOp { version } => Outcome::UpToDate {
            version: version.clone(),
        },
        Action::Blocked { reason } => Outcome::Blocked {
            reason: reason.clone(),
        },
    }
}

fn set_outcome(outcomes: &mut [(String, Option<Outcome>)], name: &str, outcome: Outcome) {
    if let Some((_, slot)) = outcomes.iter_mut().find(|(n, _)| n == name) {
        *slot = Some(outcome);
    }
}

/// Component names become directory names; keep them to a safe alphabet.
fn validate_name(name: &str) -> EngineResult<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(EngineError::ComponentNotFound {
            name: name.to_string(),
        })
    }
}
