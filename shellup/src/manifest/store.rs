//! On-disk manifest of installed components.
//!
//! The manifest is a schema-versioned JSON document keyed by component name.
//! [`ManifestStore::save`] writes a temporary file next to the manifest and
//! renames it over the final path, so readers never observe a partial file.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::component::ComponentRecord;
use crate::error::{EngineError, EngineResult};

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Manifest filename.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// All locally known components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Schema version of the persisted document.
    pub version: u32,

    /// Component records keyed by name.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentRecord>,
}

impl Default for ManifestRecord {
    fn default() -> Self {
        Self {
            version: MANIFEST_SCHEMA_VERSION,
            components: BTreeMap::new(),
        }
    }
}

impl ManifestRecord {
    /// Look up a component by name.
    pub fn get(&self, name: &str) -> Option<&ComponentRecord> {
        self.components.get(name)
    }

    /// Insert or replace a component record.
    pub fn upsert(&mut self, record: ComponentRecord) {
        self.components.insert(record.name.clone(), record);
    }

    /// Names of components with a recorded install.
    pub fn installed_names(&self) -> Vec<String> {
        self.components
            .values()
            .filter(|c| c.is_installed())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Check the invariants every persisted manifest must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.version > MANIFEST_SCHEMA_VERSION {
            return Err(format!(
                "schema version {} is newer than supported version {}",
                self.version, MANIFEST_SCHEMA_VERSION
            ));
        }

        for (key, record) in &self.components {
            if key != &record.name {
                return Err(format!(
                    "entry '{}' is recorded under key '{}'",
                    record.name, key
                ));
            }
            if record.installed_version.is_some() && record.content_hash.is_none() {
                return Err(format!(
                    "component '{}' is recorded as installed without a content hash",
                    key
                ));
            }
        }

        Ok(())
    }
}

/// Persistent store for the manifest file.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path to the manifest file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest.
    ///
    /// A missing file yields an empty manifest.
    pub fn load(&self) -> EngineResult<ManifestRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no manifest yet, starting empty");
                return Ok(ManifestRecord::default());
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(self.corrupt(format!("not valid UTF-8: {}", e)));
            }
            Err(e) => return Err(EngineError::io(&self.path, e)),
        };

        let record: ManifestRecord =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;
        record.validate().map_err(|reason| self.corrupt(reason))?;

        debug!(
            path = %self.path.display(),
            components = record.components.len(),
            "loaded manifest"
        );
        Ok(record)
    }

    /// Atomically replace the manifest with `record`.
    pub fn save(&self, record: &ManifestRecord) -> EngineResult<()> {
        record.validate().map_err(|reason| self.corrupt(reason))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| EngineError::Config(format!("cannot serialize manifest: {}", e)))?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| EngineError::io(&dir, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| EngineError::io(tmp.path(), e))?;

        tmp.persist(&self.path)
            .map_err(|e| EngineError::io(&self.path, e.error))?;

        debug!(
            path = %self.path.display(),
            components = record.components.len(),
            "saved manifest"
        );
        Ok(())
    }

    fn corrupt(&self, reason: String) -> EngineError {
        EngineError::CorruptManifest {
            path: self.path.clone(),
            reason,
        }
    }
}
