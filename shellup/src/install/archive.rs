//! Unpacking verified artifacts into a staging directory.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::trace;

use crate::component::ArtifactFormat;
use crate::error::{EngineError, EngineResult};

/// Unpack `artifact` into `dest` and return the directory to promote.
///
/// For `tar.gz` archives whose entries all sit under one top-level
/// directory, that directory is returned instead of `dest` itself.
pub fn stage_artifact(
    artifact: &Path,
    format: ArtifactFormat,
    file_name: &str,
    dest: &Path,
) -> EngineResult<PathBuf> {
    fs::create_dir_all(dest).map_err(|e| EngineError::io(dest, e))?;

    match format {
        ArtifactFormat::TarGz => {
            let entries = unpack_tar_gz(artifact, dest)?;
            if entries == 0 {
                return Err(staging_error(dest, "archive contains no entries"));
            }
            single_top_level_dir(dest)
        }
        ArtifactFormat::File => {
            place_file(artifact, file_name, dest)?;
            Ok(dest.to_path_buf())
        }
    }
}

fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> EngineResult<usize> {
    let file = File::open(archive_path).map_err(|e| EngineError::io(archive_path, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|e| unpack_error(archive_path, dest, e))?;

    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| unpack_error(archive_path, dest, e))?;
        let path = entry
            .path()
            .map_err(|e| unpack_error(archive_path, dest, e))?
            .to_path_buf();
        trace!(entry = %path.display(), "unpacking");

        // `unpack_in` refuses entries escaping `dest` by returning false.
        let inside = entry
            .unpack_in(dest)
            .map_err(|e| unpack_error(archive_path, dest, e))?;
        if !inside {
            return Err(staging_error(
                dest,
                format!("archive entry escapes the install directory: {}", path.display()),
            ));
        }
        count += 1;
    }

    Ok(count)
}

/// The sole top-level directory of `dest`, or `dest` itself.
fn single_top_level_dir(dest: &Path) -> EngineResult<PathBuf> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dest).map_err(|e| EngineError::io(dest, e))? {
        entries.push(entry.map_err(|e| EngineError::io(dest, e))?);
    }

    match entries.as_slice() {
        [] => Err(staging_error(dest, "archive unpacked to nothing")),
        [only] => {
            let is_dir = only
                .file_type()
                .map_err(|e| EngineError::io(only.path(), e))?
                .is_dir();
            Ok(if is_dir { only.path() } else { dest.to_path_buf() })
        }
        _ => Ok(dest.to_path_buf()),
    }
}

fn place_file(artifact: &Path, file_name: &str, dest: &Path) -> EngineResult<()> {
    let mut components = Path::new(file_name).components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !valid {
        return Err(staging_error(
            dest,
            format!("invalid artifact file name '{}'", file_name),
        ));
    }

    let target = dest.join(file_name);
    fs::copy(artifact, &target).map_err(|e| EngineError::io(&target, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&target, fs::Permissions::from_mode(0o755))
            .map_err(|e| EngineError::io(&target, e))?;
    }

    Ok(())
}

fn unpack_error(archive: &Path, dest: &Path, e: io::Error) -> EngineError {
    match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::StorageFull => EngineError::io(dest, e),
        _ => staging_error(
            dest,
            format!("cannot unpack {}: {}", archive.display(), e),
        ),
    }
}

fn staging_error(path: &Path, reason: impl Into<String>) -> EngineError {
    EngineError::Staging {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn build_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_strips_single_top_level_dir() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_tar_gz(
            &archive,
            &[
                ("noctalia-shell-1.0/shell.qml", b"root"),
                ("noctalia-shell-1.0/modules/bar.qml", b"bar"),
            ],
        );

        let dest = temp.path().join("content");
        let root = stage_artifact(&archive, ArtifactFormat::TarGz, "a.tar.gz", &dest).unwrap();
        assert_eq!(root, dest.join("noctalia-shell-1.0"));
        assert_eq!(fs::read(root.join("modules/bar.qml")).unwrap(), b"bar");
    }

    #[test]
    fn test_flat_archive_kept_as_is() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_tar_gz(&archive, &[("shell.qml", b"root"), ("README", b"hi")]);

        let dest = temp.path().join("content");
        let root = stage_artifact(&archive, ArtifactFormat::TarGz, "a.tar.gz", &dest).unwrap();
        assert_eq!(root, dest);
        assert!(dest.join("shell.qml").is_file());
    }

    #[test]
    fn test_garbage_archive_is_staging_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = stage_artifact(
            &archive,
            ArtifactFormat::TarGz,
            "a.tar.gz",
            &temp.path().join("content"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StagingError);
    }

    #[test]
    fn test_empty_archive_is_staging_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.tar.gz");
        build_tar_gz(&archive, &[]);

        let err = stage_artifact(
            &archive,
            ArtifactFormat::TarGz,
            "a.tar.gz",
            &temp.path().join("content"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StagingError);
    }

    #[test]
    fn test_single_file_placed_under_name() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("download.part");
        fs::write(&artifact, b"#!/bin/sh\n").unwrap();

        let dest = temp.path().join("content");
        let root = stage_artifact(&artifact, ArtifactFormat::File, "noctalia-qs", &dest).unwrap();
        assert_eq!(root, dest);
        assert_eq!(fs::read(dest.join("noctalia-qs")).unwrap(), b"#!/bin/sh\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dest.join("noctalia-qs")).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_single_file_rejects_traversal() {
        let temp = TempDir::new().unwrap();
        let artifact = temp.path().join("download.part");
        fs::write(&artifact, b"x").unwrap();

        let err = stage_artifact(
            &artifact,
            ArtifactFormat::File,
            "..",
            &temp.path().join("content"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StagingError);
    }
}
