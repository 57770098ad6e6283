//! Filesystem operations used to promote and roll back installs.
//!
//! Going through [`Filesystem`] instead of `std::fs` lets tests inject
//! failures at any step of the swap.

use std::fs;
use std::io;
use std::path::Path;

/// The mutating operations the installer performs on live paths.
pub trait Filesystem: Send + Sync {
    /// Atomically rename `from` to `to` (same filesystem).
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file, symlink or directory tree.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and its parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// [`Filesystem`] backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFilesystem;

impl Filesystem for StdFilesystem {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        let meta = fs::symlink_metadata(path)?;
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

/// Whether anything (including a dangling symlink) exists at `path`.
pub(crate) fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
