//! Action planning.
//!
//! Planning is a pure function of the installed version, the resolved
//! release and whether the caller pinned an exact version.

use std::fmt;
use std::path::PathBuf;

use semver::Version;

use crate::component::ReleaseDescriptor;
use crate::manifest::ManifestRecord;

/// Reason string for blocked downgrades.
pub const DOWNGRADE_BLOCKED: &str = "downgrade";

/// What to do with one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Install { to: Version },
    Upgrade { from: Version, to: Version },
    /// Only planned when the caller asked for this exact version.
    Downgrade { from: Version, to: Version },
    NoOp { version: Version },
    Blocked { reason: String },
}

impl Action {
    /// Whether the action fetches and installs an artifact.
    pub fn changes_disk(&self) -> bool {
        matches!(
            self,
            Self::Install { .. } | Self::Upgrade { .. } | Self::Downgrade { .. }
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install { to } => write!(f, "install {}", to),
            Self::Upgrade { from, to } => write!(f, "upgrade {} -> {}", from, to),
            Self::Downgrade { from, to } => write!(f, "downgrade {} -> {}", from, to),
            Self::NoOp { version } => write!(f, "up to date ({})", version),
            Self::Blocked { reason } => write!(f, "blocked ({})", reason),
        }
    }
}

/// Decide the action for one component.
pub fn plan_action(installed: Option<&Version>, resolved: &Version, explicit: bool) -> Action {
    match installed {
        None => Action::Install {
            to: resolved.clone(),
        },
        Some(current) if current == resolved => Action::NoOp {
            version: current.clone(),
        },
        Some(current) if resolved > current => Action::Upgrade {
            from: current.clone(),
            to: resolved.clone(),
        },
        Some(current) if explicit => Action::Downgrade {
            from: current.clone(),
            to: resolved.clone(),
        },
        Some(_) => Action::Blocked {
            reason: DOWNGRADE_BLOCKED.to_string(),
        },
    }
}

/// A component whose release was resolved and is ready to plan.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub name: String,
    pub release: ReleaseDescriptor,
    /// The caller pinned this exact version.
    pub explicit: bool,
    pub install_path: PathBuf,
}

/// One planned step.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    pub name: String,
    pub action: Action,
    pub release: ReleaseDescriptor,
    pub install_path: PathBuf,
}

/// Ordered, immutable list of planned steps.
#[derive(Debug, Clone, Default)]
pub struct ActionPlan {
    actions: Vec<PlannedAction>,
}

impl ActionPlan {
    /// Plan every resolved component against the manifest, keeping order.
    pub fn build(manifest: &ManifestRecord, resolved: Vec<Resolved>) -> Self {
        let actions = resolved
            .into_iter()
            .map(|r| {
                let installed = manifest
                    .get(&r.name)
                    .and_then(|c| c.installed_version.as_ref());
                PlannedAction {
                    action: plan_action(installed, &r.release.version, r.explicit),
                    name: r.name,
                    release: r.release,
                    install_path: r.install_path,
                }
            })
            .collect();
        Self { actions }
    }

    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    /// Steps that change the disk.
    pub fn pending(&self) -> impl Iterator<Item = &PlannedAction> {
        self.actions.iter().filter(|a| a.action.changes_disk())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ArtifactFormat, ComponentRecord};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn release(name: &str, version: &str) -> ReleaseDescriptor {
        ReleaseDescriptor {
            component: name.to_string(),
            version: v(version),
            download_url: format!("https://example.com/{}-{}.tar.gz", name, version),
            expected_hash: "00".repeat(32),
            size_bytes: 1,
            format: ArtifactFormat::TarGz,
        }
    }

    #[test]
    fn test_fresh_install() {
        assert_eq!(
            plan_action(None, &v("1.0.0"), false),
            Action::Install { to: v("1.0.0") }
        );
    }

    #[test]
    fn test_same_version_is_noop() {
        assert_eq!(
            plan_action(Some(&v("1.0.0")), &v("1.0.0"), false),
            Action::NoOp { version: v("1.0.0") }
        );
        assert_eq!(
            plan_action(Some(&v("1.0.0")), &v("1.0.0"), true),
            Action::NoOp { version: v("1.0.0") }
        );
    }

    #[test]
    fn test_upgrade() {
        assert_eq!(
            plan_action(Some(&v("1.0.0")), &v("1.1.0"), false),
            Action::Upgrade {
                from: v("1.0.0"),
                to: v("1.1.0")
            }
        );
    }

    #[test]
    fn test_downgrade_blocked_unless_explicit() {
        assert_eq!(
            plan_action(Some(&v("2.0.0")), &v("1.5.0"), false),
            Action::Blocked {
                reason: DOWNGRADE_BLOCKED.to_string()
            }
        );
        assert_eq!(
            plan_action(Some(&v("2.0.0")), &v("1.5.0"), true),
            Action::Downgrade {
                from: v("2.0.0"),
                to: v("1.5.0")
            }
        );
    }

    #[test]
    fn test_prerelease_to_release_is_upgrade() {
        assert!(matches!(
            plan_action(Some(&v("2.0.0-rc.1")), &v("2.0.0"), false),
            Action::Upgrade { .. }
        ));
    }

    #[test]
    fn test_build_keeps_order() {
        let mut manifest = ManifestRecord::default();
        manifest.upsert(ComponentRecord::installed("b", "/b", v("1.0.0"), "h"));

        let plan = ActionPlan::build(
            &manifest,
            vec![
                Resolved {
                    name: "b".to_string(),
                    release: release("b", "1.0.0"),
                    explicit: false,
                    install_path: PathBuf::from("/b"),
                },
                Resolved {
                    name: "a".to_string(),
                    release: release("a", "0.1.0"),
                    explicit: false,
                    install_path: PathBuf::from("/a"),
                },
            ],
        );

        let names: Vec<_> = plan.actions().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(plan.pending().count(), 1);
        assert!(matches!(plan.actions()[0].action, Action::NoOp { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn version() -> impl Strategy<Value = Version> {
            (0u64..5, 0u64..5, 0u64..5).prop_map(|(a, b, c)| Version::new(a, b, c))
        }

        proptest! {
            #[test]
            fn prop_never_downgrades_without_request(
                installed in version(),
                resolved in version(),
            ) {
                let action = plan_action(Some(&installed), &resolved, false);
                let downgrades = matches!(action, Action::Downgrade { .. });
                prop_assert!(!downgrades, "planned {:?}", action);
                if resolved < installed {
                    let blocked = matches!(action, Action::Blocked { .. });
                    prop_assert!(blocked, "planned {:?}", action);
                }
            }

            #[test]
            fn prop_changes_disk_iff_versions_differ(
                installed in version(),
                resolved in version(),
            ) {
                let action = plan_action(Some(&installed), &resolved, true);
                prop_assert_eq!(action.changes_disk(), installed != resolved);
            }
        }
    }
}
