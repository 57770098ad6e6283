//! Deterministic content digest of an installed tree.
//!
//! Entries are visited in sorted order of their `/`-separated relative
//! paths. For each entry the digest absorbs a type tag, the path, and then
//! the file bytes or symlink target. Timestamps and permissions are not
//! part of the digest.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{EngineError, EngineResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 over the tree rooted at `root`, as lowercase hex.
///
/// `root` may also be a single file.
pub fn tree_digest(root: &Path) -> EngineResult<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    hash_entry(root, "", &mut hasher, &mut buffer)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_entry(
    path: &Path,
    rel: &str,
    hasher: &mut Sha256,
    buffer: &mut [u8],
) -> EngineResult<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| EngineError::io(path, e))?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| EngineError::io(path, e))?;
        absorb_header(hasher, b'l', rel);
        absorb_bytes(hasher, target.to_string_lossy().as_bytes());
    } else if file_type.is_dir() {
        absorb_header(hasher, b'd', rel);

        let mut children = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| EngineError::io(path, e))? {
            let entry = entry.map_err(|e| EngineError::io(path, e))?;
            children.push(entry.file_name().to_string_lossy().into_owned());
        }
        children.sort();

        for child in children {
            let child_rel = if rel.is_empty() {
                child.clone()
            } else {
                format!("{}/{}", rel, child)
            };
            hash_entry(&path.join(&child), &child_rel, hasher, buffer)?;
        }
    } else {
        absorb_header(hasher, b'f', rel);
        hasher.update(meta.len().to_le_bytes());

        let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        loop {
            let n = file.read(buffer).map_err(|e| EngineError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
    }

    Ok(())
}

fn absorb_header(hasher: &mut Sha256, tag: u8, rel: &str) {
    hasher.update([tag]);
    absorb_bytes(hasher, rel.as_bytes());
}

/// Length-prefixed so adjacent fields cannot run together.
fn absorb_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_tree(root: &Path, files: &[(&str, &str)]) {
        for (rel, content) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_identical_trees_match() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        // Creation order differs; digest must not.
        write_tree(a.path(), &[("shell.qml", "A"), ("modules/bar.qml", "B")]);
        write_tree(b.path(), &[("modules/bar.qml", "B"), ("shell.qml", "A")]);

        assert_eq!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn test_content_change_detected() {
        let temp = TempDir::new().unwrap();
        write_tree(temp.path(), &[("shell.qml", "A")]);
        let before = tree_digest(temp.path()).unwrap();

        fs::write(temp.path().join("shell.qml"), "A2").unwrap();
        assert_ne!(before, tree_digest(temp.path()).unwrap());
    }

    #[test]
    fn test_rename_detected() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_tree(a.path(), &[("x.qml", "A")]);
        write_tree(b.path(), &[("y.qml", "A")]);
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn test_empty_dir_counts() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_tree(a.path(), &[("x", "1")]);
        write_tree(b.path(), &[("x", "1")]);
        fs::create_dir(b.path().join("assets")).unwrap();
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn test_field_boundaries() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write_tree(a.path(), &[("ab", "c")]);
        write_tree(b.path(), &[("a", "bc")]);
        assert_ne!(tree_digest(a.path()).unwrap(), tree_digest(b.path()).unwrap());
    }

    #[test]
    fn test_missing_root_is_error() {
        let temp = TempDir::new().unwrap();
        assert!(tree_digest(&temp.path().join("missing")).is_err());
    }
}
