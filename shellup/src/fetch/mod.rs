//! Artifact download with integrity verification.
//!
//! The [`Fetcher`] streams an artifact into a private temporary file while
//! hashing it. An artifact is only handed out once its size and SHA-256
//! digest match the release descriptor; anything else is deleted before
//! the installer can see it.

mod checksum;
mod transport;

pub use checksum::{calculate_file_checksum, digest_matches, HashingWriter};
pub use transport::{
    FileTransport, HttpTransport, SchemeTransport, Transport, TransportResponse,
    DEFAULT_TIMEOUT_SECS, USER_AGENT,
};

use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::component::ReleaseDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::retry::{network_error, RetryPolicy};

use checksum::BUFFER_SIZE;

/// Name prefix and suffix of in-flight download files.
const PART_PREFIX: &str = ".shellup-";
const PART_SUFFIX: &str = ".part";

/// A verified artifact on local disk. The file is removed on drop.
#[derive(Debug)]
pub struct FetchedArtifact {
    path: TempPath,
    sha256: String,
    size: u64,
}

impl FetchedArtifact {
    /// Local path of the downloaded bytes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase hex SHA-256 of the artifact.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

}

/// Downloads and verifies artifacts.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    download_dir: PathBuf,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("download_dir", &self.download_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    /// Create a fetcher writing temporary files into `download_dir`.
    pub fn new(transport: Arc<dyn Transport>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            download_dir: download_dir.into(),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy (builder pattern).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Delete partial downloads left by a process that died mid-transfer.
    ///
    /// Only call while holding the exclusive manifest lock; otherwise a
    /// concurrent invocation's in-flight download could be removed.
    /// Returns the number of files removed.
    pub fn sweep(&self) -> usize {
        let entries = match fs::read_dir(&self.download_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(PART_PREFIX) || !name.ends_with(PART_SUFFIX) {
                continue;
            }
            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed stale partial download");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "cannot remove partial download"),
            }
        }
        removed
    }

    /// Download `release` and verify it.
    ///
    /// Transient network failures are retried per the retry policy.
    /// Integrity and local write failures are not.
    pub fn fetch(&self, release: &ReleaseDescriptor) -> EngineResult<FetchedArtifact> {
        fs::create_dir_all(&self.download_dir)
            .map_err(|e| EngineError::io(&self.download_dir, e))?;

        let artifact = self.retry.run(&release.download_url, |attempt| {
            debug!(
                component = %release.component,
                version = %release.version,
                url = %release.download_url,
                attempt,
                "fetching artifact"
            );
            self.fetch_once(release)
        })?;

        info!(
            component = %release.component,
            version = %release.version,
            bytes = artifact.size,
            "artifact verified"
        );
        Ok(artifact)
    }

    fn fetch_once(&self, release: &ReleaseDescriptor) -> EngineResult<FetchedArtifact> {
        let url = release.download_url.as_str();
        let expected_size = release.size_bytes;

        let response = self.transport.open(url)?;
        if let Some(announced) = response.content_length {
            if announced != expected_size {
                return Err(EngineError::SizeMismatch {
                    url: url.to_string(),
                    expected: expected_size,
                    actual: announced,
                });
            }
        }

        let tmp = tempfile::Builder::new()
            .prefix(PART_PREFIX)
            .suffix(PART_SUFFIX)
            .tempfile_in(&self.download_dir)
            .map_err(|e| EngineError::io(&self.download_dir, e))?;
        let tmp_path = tmp.path().to_path_buf();

        let mut writer = HashingWriter::new(BufWriter::new(tmp));
        let mut body = response.body;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        loop {
            let n = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(network_error(url, format!("read error: {}", e))),
            };

            let total = writer.written() + n as u64;
            if total > expected_size {
                return Err(EngineError::SizeMismatch {
                    url: url.to_string(),
                    expected: expected_size,
                    actual: total,
                });
            }

            writer
                .write_all(&buffer[..n])
                .map_err(|e| EngineError::io(&tmp_path, e))?;
        }

        let received = writer.written();
        if received < expected_size {
            return Err(network_error(
                url,
                format!(
                    "transfer truncated after {} of {} bytes",
                    received, expected_size
                ),
            ));
        }

        let (buffered, actual) = writer.finish();
        let file = buffered
            .into_inner()
            .map_err(|e| EngineError::io(&tmp_path, e.into_error()))?;
        file.as_file()
            .sync_all()
            .map_err(|e| EngineError::io(&tmp_path, e))?;

        if !digest_matches(&release.expected_hash, &actual) {
            // Dropping `file` deletes the bytes.
            return Err(EngineError::IntegrityMismatch {
                url: url.to_string(),
                expected: release.expected_hash.trim().to_lowercase(),
                actual,
            });
        }

        Ok(FetchedArtifact {
            path: file.into_temp_path(),
            sha256: actual,
            size: received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ArtifactFormat;
    use crate::error::ErrorKind;
    use semver::Version;
    use sha2::{Digest, Sha256};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Serves a fixed body, optionally failing the first few opens.
    struct MemoryTransport {
        body: Vec<u8>,
        content_length: Option<u64>,
        failures: AtomicU32,
        opens: AtomicU32,
    }

    impl MemoryTransport {
        fn new(body: &[u8]) -> Self {
            Self {
                body: body.to_vec(),
                content_length: Some(body.len() as u64),
                failures: AtomicU32::new(0),
                opens: AtomicU32::new(0),
            }
        }

        fn failing(body: &[u8], failures: u32) -> Self {
            let t = Self::new(body);
            t.failures.store(failures, Ordering::SeqCst);
            t
        }
    }

    impl Transport for MemoryTransport {
        fn open(&self, url: &str) -> EngineResult<TransportResponse> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(network_error(url, "connection reset"));
            }
            Ok(TransportResponse {
                body: Box::new(Cursor::new(self.body.clone())),
                content_length: self.content_length,
            })
        }
    }

    fn sha256_hex(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    fn release(body: &[u8]) -> ReleaseDescriptor {
        ReleaseDescriptor {
            component: "shell".to_string(),
            version: Version::new(1, 0, 0),
            download_url: "https://example.com/shell.tar.gz".to_string(),
            expected_hash: sha256_hex(body),
            size_bytes: body.len() as u64,
            format: ArtifactFormat::TarGz,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::ExponentialBackoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    fn fetcher(transport: Arc<dyn Transport>, dir: &Path) -> Fetcher {
        Fetcher::new(transport, dir).with_retry(fast_retry())
    }

    fn dir_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[test]
    fn test_fetch_verifies_and_returns_artifact() {
        let temp = TempDir::new().unwrap();
        let body = b"artifact bytes";
        let fetcher = fetcher(Arc::new(MemoryTransport::new(body)), temp.path());

        let artifact = fetcher.fetch(&release(body)).unwrap();
        assert_eq!(fs::read(artifact.path()).unwrap(), body);
        assert_eq!(artifact.sha256(), sha256_hex(body));

        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn test_uppercase_expected_hash_accepted() {
        let temp = TempDir::new().unwrap();
        let body = b"artifact bytes";
        let fetcher = fetcher(Arc::new(MemoryTransport::new(body)), temp.path());

        let mut rel = release(body);
        rel.expected_hash = rel.expected_hash.to_uppercase();
        assert!(fetcher.fetch(&rel).is_ok());
    }

    #[test]
    fn test_hash_mismatch_deletes_download() {
        let temp = TempDir::new().unwrap();
        let body = b"tampered bytes";
        let transport = Arc::new(MemoryTransport::new(body));
        let fetcher = fetcher(transport.clone(), temp.path());

        let mut rel = release(body);
        rel.expected_hash = sha256_hex(b"original bytes");

        let err = fetcher.fetch(&rel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert!(dir_is_empty(temp.path()));
    }

    #[test]
    fn test_announced_size_mismatch_fails_fast() {
        let temp = TempDir::new().unwrap();
        let body = b"artifact bytes";
        let fetcher = fetcher(Arc::new(MemoryTransport::new(body)), temp.path());

        let mut rel = release(body);
        rel.size_bytes += 10;

        let err = fetcher.fetch(&rel).unwrap_err();
        assert!(matches!(err, EngineError::SizeMismatch { .. }));
        assert!(dir_is_empty(temp.path()));
    }

    #[test]
    fn test_oversized_stream_is_aborted() {
        let temp = TempDir::new().unwrap();
        let body = b"much longer than announced";
        let mut transport = MemoryTransport::new(body);
        transport.content_length = None;
        let fetcher = fetcher(Arc::new(transport), temp.path());

        let mut rel = release(body);
        rel.size_bytes = 4;

        let err = fetcher.fetch(&rel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityMismatch);
        assert!(dir_is_empty(temp.path()));
    }

    #[test]
    fn test_truncated_stream_is_retryable_network_error() {
        let temp = TempDir::new().unwrap();
        let body = b"short";
        let mut transport = MemoryTransport::new(body);
        transport.content_length = None;
        let transport = Arc::new(transport);
        let fetcher = fetcher(transport.clone(), temp.path());

        let mut rel = release(body);
        rel.size_bytes = 100;

        let err = fetcher.fetch(&rel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
        assert!(dir_is_empty(temp.path()));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let temp = TempDir::new().unwrap();
        let body = b"artifact bytes";
        let transport = Arc::new(MemoryTransport::failing(body, 2));
        let fetcher = fetcher(transport.clone(), temp.path());

        assert!(fetcher.fetch(&release(body)).is_ok());
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let temp = TempDir::new().unwrap();
        let body = b"artifact bytes";
        let transport = Arc::new(MemoryTransport::failing(body, 10));
        let fetcher = fetcher(transport.clone(), temp.path());

        let err = fetcher.fetch(&release(body)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fetch_over_file_transport() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("shell.bin");
        let body = b"local mirror";
        fs::write(&source, body).unwrap();

        let downloads = temp.path().join("downloads");
        let fetcher = fetcher(Arc::new(FileTransport), &downloads);
        let mut rel = release(body);
        rel.download_url = format!("file://{}", source.display());

        let artifact = fetcher.fetch(&rel).unwrap();
        assert!(artifact.path().starts_with(&downloads));
    }

    #[test]
    fn test_sweep_removes_only_partial_downloads() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".shellup-dead01.part"), b"half").unwrap();
        fs::write(temp.path().join(".shellup-dead02.part"), b"").unwrap();
        fs::write(temp.path().join("notes.part"), b"keep").unwrap();
        fs::write(temp.path().join(".shellup-index"), b"keep").unwrap();
        let fetcher = fetcher(Arc::new(MemoryTransport::new(b"x")), temp.path());

        assert_eq!(fetcher.sweep(), 2);
        assert!(!temp.path().join(".shellup-dead01.part").exists());
        assert!(temp.path().join("notes.part").exists());
        assert!(temp.path().join(".shellup-index").exists());
    }

    #[test]
    fn test_sweep_missing_dir() {
        let temp = TempDir::new().unwrap();
        let fetcher = fetcher(Arc::new(MemoryTransport::new(b"x")), &temp.path().join("absent"));
        assert_eq!(fetcher.sweep(), 0);
    }
}
