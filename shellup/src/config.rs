//! Engine configuration.
//!
//! Settings are read from an INI file, by default
//! `<config_dir>/shellup/config.ini`:
//!
//! ```ini
//! [registry]
//! feed_url = https://example.com/feed.json
//!
//! [paths]
//! install_root = ~/.config/quickshell
//! manifest = ~/.config/shellup/manifest.json
//! cache_dir = ~/.cache/shellup
//! log_dir = ~/.local/state/shellup
//!
//! [network]
//! timeout_secs = 300
//! retries = 3
//!
//! [engine]
//! max_concurrency = 4
//! lock_timeout_secs = 30
//!
//! [components]
//! shell = /opt/noctalia-shell
//! ```
//!
//! Every key is optional except `feed_url`, which only becomes required
//! when the registry is actually queried.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Directory name used under the platform config, cache and state dirs.
pub const APP_DIR: &str = "shellup";

/// Config file name.
pub const CONFIG_FILENAME: &str = "config.ini";

/// Name of the desktop shell component.
pub const SHELL_COMPONENT: &str = "shell";

/// Install directory name of the `shell` component.
pub const SHELL_DIR_NAME: &str = "noctalia-shell";

/// System-wide quickshell config directory used by distribution packages.
const SYSTEM_QUICKSHELL_DIR: &str = "/etc/xdg/quickshell";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Configuration for the update engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// URL of the registry feed (`http(s)://` or `file://`).
    pub feed_url: Option<String>,

    /// Directory components are installed under.
    ///
    /// Defaults to the Quickshell config directory.
    pub install_root: PathBuf,

    /// Path of the manifest file.
    pub manifest_path: PathBuf,

    /// Directory for in-flight downloads.
    pub cache_dir: PathBuf,

    /// Directory for log files.
    pub log_dir: PathBuf,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Attempts per download, including the first.
    pub retries: u32,

    /// Maximum components processed in parallel by `update --all`.
    pub max_concurrency: usize,

    /// How long to wait for another invocation to release the manifest.
    pub lock_timeout: Duration,

    /// Per-component install path overrides.
    pub component_paths: BTreeMap<String, PathBuf>,

    /// Extra places where a shell installed by other means may live.
    pub system_shell_dirs: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir().unwrap_or_else(|| home().join(".config"));
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| home().join(".cache"));
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| home().join(".local/state"));

        Self {
            feed_url: None,
            install_root: config_dir.join("quickshell"),
            manifest_path: config_dir.join(APP_DIR).join(crate::manifest::MANIFEST_FILENAME),
            cache_dir: cache_dir.join(APP_DIR),
            log_dir: state_dir.join(APP_DIR),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retries: DEFAULT_RETRIES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            component_paths: BTreeMap::new(),
            system_shell_dirs: vec![PathBuf::from(SYSTEM_QUICKSHELL_DIR).join(SHELL_DIR_NAME)],
        }
    }
}

impl EngineConfig {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| home().join(".config"))
            .join(APP_DIR)
            .join(CONFIG_FILENAME)
    }

    /// Load configuration.
    ///
    /// With `path == None` the default location is used and a missing file
    /// yields defaults. An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        if !path.exists() {
            if explicit {
                return Err(EngineError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(&path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_ini(&ini)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Build a configuration from parsed INI, starting from defaults.
    pub fn from_ini(ini: &Ini) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("registry")) {
            if let Some(url) = section.get("feed_url") {
                let url = url.trim();
                if !url.is_empty() {
                    config.feed_url = Some(url.to_string());
                }
            }
        }

        if let Some(section) = ini.section(Some("paths")) {
            if let Some(v) = section.get("install_root") {
                config.install_root = expand_path(v);
            }
            if let Some(v) = section.get("manifest") {
                config.manifest_path = expand_path(v);
            }
            if let Some(v) = section.get("cache_dir") {
                config.cache_dir = expand_path(v);
            }
            if let Some(v) = section.get("log_dir") {
                config.log_dir = expand_path(v);
            }
            if let Some(v) = section.get("system_shell_dirs") {
                config.system_shell_dirs = v
                    .split(':')
                    .filter(|p| !p.trim().is_empty())
                    .map(expand_path)
                    .collect();
            }
        }

        if let Some(section) = ini.section(Some("network")) {
            if let Some(v) = section.get("timeout_secs") {
                config.timeout = Duration::from_secs(parse_value("network", "timeout_secs", v)?);
            }
            if let Some(v) = section.get("retries") {
                config.retries = parse_value("network", "retries", v)?;
            }
        }

        if let Some(section) = ini.section(Some("engine")) {
            if let Some(v) = section.get("max_concurrency") {
                config.max_concurrency = parse_value("engine", "max_concurrency", v)?;
            }
            if let Some(v) = section.get("lock_timeout_secs") {
                config.lock_timeout =
                    Duration::from_secs(parse_value("engine", "lock_timeout_secs", v)?);
            }
        }

        if let Some(section) = ini.section(Some("components")) {
            for (name, path) in section.iter() {
                config
                    .component_paths
                    .insert(name.to_string(), expand_path(path));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> EngineResult<()> {
        if self.retries == 0 {
            return Err(EngineError::Config(
                "[network] retries must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::Config(
                "[engine] max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EngineError::Config(
                "[network] timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The feed URL, or a configuration error if none is set.
    pub fn require_feed_url(&self) -> EngineResult<&str> {
        self.feed_url.as_deref().ok_or_else(|| {
            EngineError::Config(format!(
                "no registry feed configured; set [registry] feed_url in {}",
                Self::default_path().display()
            ))
        })
    }

    /// Where component `name` is installed.
    pub fn install_path_for(&self, name: &str) -> PathBuf {
        if let Some(path) = self.component_paths.get(name) {
            return path.clone();
        }
        match name {
            SHELL_COMPONENT => self.install_root.join(SHELL_DIR_NAME),
            other => self.install_root.join(other),
        }
    }

    /// Set the feed URL.
    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = Some(url.into());
        self
    }

    /// Set the install root.
    pub fn with_install_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_root = path.into();
        self
    }

    /// Set the manifest path.
    pub fn with_manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.manifest_path = path.into();
        self
    }

    /// Set the download cache directory.
    pub fn with_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = path.into();
        self
    }

    /// Set the log directory.
    pub fn with_log_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_dir = path.into();
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of download attempts.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the `update --all` worker count.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the manifest lock wait.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Override the install path of one component.
    pub fn with_component_path(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.component_paths.insert(name.into(), path.into());
        self
    }

    /// Replace the system-wide shell locations checked by `status`.
    pub fn with_system_shell_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_shell_dirs = dirs;
        self
    }
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~/` to the home directory.
fn expand_path(value: &str) -> PathBuf {
    let value = value.trim();
    match value.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None if value == "~" => home(),
        None => PathBuf::from(value),
    }
}

fn parse_value<T: FromStr>(section: &str, key: &str, value: &str) -> EngineResult<T> {
    value.trim().parse().map_err(|_| {
        EngineError::Config(format!(
            "[{}] {}: invalid value '{}'",
            section,
            key,
            value.trim()
        ))
    })
}
