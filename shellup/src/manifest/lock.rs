//! Advisory lock serialising invocations that share a manifest.
//!
//! The lock lives in a sibling `<manifest>.lock` file and is held for the
//! whole load-modify-save cycle. Acquisition polls until a bounded deadline
//! so batch scripts running back to back wait instead of failing.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs4::FileExt;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Delay between lock attempts while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Readers (`status`) may share the lock.
    Shared,
    /// Writers hold the lock alone.
    Exclusive,
}

/// A held manifest lock. Released on drop.
#[derive(Debug)]
pub struct ManifestLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl ManifestLock {
    /// Path of the lock file guarding `manifest_path`.
    pub fn lock_path(manifest_path: &Path) -> PathBuf {
        let mut name = manifest_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        manifest_path.with_file_name(name)
    }

    /// Acquire the lock, waiting at most `timeout`.
    ///
    /// A zero timeout makes a single attempt.
    pub fn acquire(manifest_path: &Path, mode: LockMode, timeout: Duration) -> EngineResult<Self> {
        let path = Self::lock_path(manifest_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| EngineError::io(&path, e))?;

        let started = Instant::now();
        let mut announced = false;
        loop {
            match try_lock(&file, mode) {
                Ok(()) => {
                    debug!(path = %path.display(), ?mode, "acquired manifest lock");
                    return Ok(Self { file, path, mode });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        return Err(EngineError::ManifestLocked {
                            path: manifest_path.to_path_buf(),
                            waited_secs: waited.as_secs(),
                        });
                    }
                    if !announced {
                        info!(
                            path = %path.display(),
                            "manifest is locked by another invocation, waiting"
                        );
                        announced = true;
                    }
                    thread::sleep(POLL_INTERVAL.min(timeout - waited));
                }
                Err(e) => return Err(EngineError::io(&path, e)),
            }
        }
    }

    /// Lock access mode.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ManifestLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "failed to release manifest lock");
        }
    }
}

fn try_lock(file: &File, mode: LockMode) -> io::Result<()> {
    match mode {
        LockMode::Shared => FileExt::try_lock_shared(file),
        LockMode::Exclusive => FileExt::try_lock_exclusive(file),
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}
