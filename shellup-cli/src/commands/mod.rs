//! Command handlers.
//!
//! Each handler takes the engine and an [`Output`] and returns the process
//! exit code for a run that got far enough to produce a report. Errors that
//! abort the command come back as [`CliError`].

pub mod install;
pub mod status;
pub mod update;

use shellup::engine::{ComponentReport, Outcome};

use crate::error::CliError;
use crate::output::Output;

/// Print one component's outcome.
fn print_outcome(out: &dyn Output, report: &ComponentReport) {
    let line = format!("{}: {}", report.name, report.outcome);
    match &report.outcome {
        Outcome::Installed { .. } | Outcome::Upgraded { .. } | Outcome::Downgraded { .. } => {
            out.success(&line)
        }
        Outcome::UpToDate { .. } => out.info(&line),
        Outcome::Blocked { .. } | Outcome::Skipped => out.warn(&line),
        Outcome::Failed { .. } => out.error(&line),
    }
}

/// Print an error that ended a command.
pub fn print_error(out: &dyn Output, error: &CliError) {
    out.error(&format!("[{}] {}", error.kind_label(), error));
}

#[cfg(test)]
pub(crate) mod testing {
    //! A `file://` registry with single-file releases.

    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use shellup::config::EngineConfig;
    use shellup::fetch::calculate_file_checksum;
    use shellup::UpdateEngine;
    use tempfile::TempDir;

    pub struct Mirror {
        pub temp: TempDir,
        releases: Vec<(String, String)>,
    }

    impl Mirror {
        pub fn new() -> Self {
            Self {
                temp: TempDir::new().unwrap(),
                releases: Vec::new(),
            }
        }

        pub fn install_root(&self) -> PathBuf {
            self.temp.path().join("root")
        }

        /// Publish `name` at `version`; a `None` body publishes a bad checksum.
        pub fn publish(&mut self, name: &str, version: &str, body: Option<&str>) {
            let dir = self.temp.path().join("mirror");
            fs::create_dir_all(&dir).unwrap();
            let path = dir.join(format!("{}-{}", name, version));
            fs::write(&path, body.unwrap_or("corrupt")).unwrap();
            let sha = match body {
                Some(_) => calculate_file_checksum(&path).unwrap(),
                None => "0".repeat(64),
            };
            let entry = format!(
                r#"{{"version":"{}","url":"file://{}","sha256":"{}","size":{},"format":"file"}}"#,
                version,
                path.display(),
                sha,
                fs::metadata(&path).unwrap().len()
            );
            self.releases.push((name.to_string(), entry));
        }

        fn write_feed(&self) -> PathBuf {
            let mut names: Vec<&str> = self.releases.iter().map(|(n, _)| n.as_str()).collect();
            names.sort();
            names.dedup();
            let components: Vec<String> = names
                .iter()
                .map(|name| {
                    let releases: Vec<&str> = self
                        .releases
                        .iter()
                        .filter(|(n, _)| n == name)
                        .map(|(_, r)| r.as_str())
                        .collect();
                    format!(r#""{}":{{"releases":[{}]}}"#, name, releases.join(","))
                })
                .collect();
            let path = self.temp.path().join("feed.json");
            fs::write(&path, format!(r#"{{"components":{{{}}}}}"#, components.join(","))).unwrap();
            path
        }

        pub fn engine(&self) -> UpdateEngine {
            let feed = self.write_feed();
            let config = EngineConfig::default()
                .with_feed_url(format!("file://{}", feed.display()))
                .with_install_root(self.install_root())
                .with_manifest_path(self.temp.path().join("state/manifest.json"))
                .with_cache_dir(self.temp.path().join("cache"))
                .with_log_dir(self.temp.path().join("logs"))
                .with_retries(1)
                .with_lock_timeout(Duration::from_secs(5))
                .with_system_shell_dirs(Vec::new());
            UpdateEngine::from_config(config).unwrap()
        }
    }
}
