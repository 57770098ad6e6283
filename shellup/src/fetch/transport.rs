//! Byte transports for feeds and artifacts.
//!
//! `http://` and `https://` URLs go through a blocking `reqwest` client;
//! `file://` URLs read from the local filesystem, which serves local mirrors
//! and tests.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::Client;

use crate::error::{EngineError, EngineResult};
use crate::retry::network_error;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// User agent sent with every HTTP request.
pub const USER_AGENT: &str = concat!(
    "shellup/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/noctalia-dev/noctalia)"
);

/// An open byte stream.
pub struct TransportResponse {
    /// Body reader.
    pub body: Box<dyn Read + Send>,
    /// Length announced by the source, if any.
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Opens URLs for reading.
pub trait Transport: Send + Sync {
    /// Open `url` and return its body stream.
    fn open(&self, url: &str) -> EngineResult<TransportResponse>;

    /// Read the whole body of `url` into memory, up to `limit` bytes.
    fn read_to_end(&self, url: &str, limit: u64) -> EngineResult<Vec<u8>> {
        let response = self.open(url)?;
        let mut buf = Vec::new();
        response
            .body
            .take(limit.saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|e| network_error(url, format!("read error: {}", e)))?;
        if buf.len() as u64 > limit {
            return Err(EngineError::Feed {
                url: url.to_string(),
                reason: format!("response exceeds {} bytes", limit),
            });
        }
        Ok(buf)
    }
}

/// Blocking HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> EngineResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EngineError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }
}

impl Transport for HttpTransport {
    fn open(&self, url: &str) -> EngineResult<TransportResponse> {
        let response = self.client.get(url).send().map_err(|e| {
            if e.is_timeout() {
                network_error(url, format!("timed out after {}s", self.timeout.as_secs()))
            } else {
                network_error(url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        Ok(TransportResponse {
            body: Box::new(response),
            content_length,
        })
    }
}

/// Local filesystem transport for `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    /// Convert a `file://` URL to a path.
    ///
    /// Percent-encoding is not decoded; URLs are expected to be plain paths.
    pub fn url_to_path(url: &str) -> Option<PathBuf> {
        let rest = url.strip_prefix("file://")?;
        let path = rest.strip_prefix("localhost").unwrap_or(rest);
        if path.is_empty() {
            None
        } else {
            Some(PathBuf::from(path))
        }
    }
}

impl Transport for FileTransport {
    fn open(&self, url: &str) -> EngineResult<TransportResponse> {
        let path = Self::url_to_path(url)
            .ok_or_else(|| EngineError::Config(format!("not a file URL: {}", url)))?;
        let file = File::open(&path).map_err(|e| EngineError::io(&path, e))?;
        let content_length = file.metadata().ok().map(|m| m.len());
        Ok(TransportResponse {
            body: Box::new(BufReader::new(file)),
            content_length,
        })
    }
}

/// Dispatches to HTTP or file transport by URL scheme.
#[derive(Debug, Clone)]
pub struct SchemeTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl SchemeTransport {
    /// Create a dispatcher whose HTTP side uses `timeout`.
    pub fn new(timeout: Duration) -> EngineResult<Self> {
        Ok(Self {
            http: HttpTransport::with_timeout(timeout)?,
            file: FileTransport,
        })
    }
}

impl Transport for SchemeTransport {
    fn open(&self, url: &str) -> EngineResult<TransportResponse> {
        if url.starts_with("file://") {
            self.file.open(url)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.http.open(url)
        } else {
            Err(EngineError::Config(format!(
                "unsupported URL scheme (expected http, https or file): {}",
                url
            )))
        }
    }
}
