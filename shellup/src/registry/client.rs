//! Registry clients.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::feed::Feed;
use super::VersionConstraint;
use crate::component::ReleaseDescriptor;
use crate::error::{EngineError, EngineResult};
use crate::fetch::Transport;
use crate::retry::RetryPolicy;

/// Upper bound on feed document size (4 MiB).
const MAX_FEED_BYTES: u64 = 4 * 1024 * 1024;

/// Resolves component names to downloadable releases.
pub trait RegistryClient: Send + Sync {
    /// Pick the release of `name` matching `constraint`.
    fn resolve(&self, name: &str, constraint: &VersionConstraint)
        -> EngineResult<ReleaseDescriptor>;

    /// All releases of `name`, newest first.
    fn releases(&self, name: &str) -> EngineResult<Vec<ReleaseDescriptor>>;
}

/// Registry backed by a JSON feed document.
///
/// The feed is downloaded on first use and cached for the lifetime of the
/// client, so one invocation sees one consistent snapshot. A failed download
/// is cached too: every later lookup reports the same error without touching
/// the network again.
pub struct FeedRegistryClient {
    feed_url: String,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cache: Mutex<Option<EngineResult<Arc<Feed>>>>,
}

impl std::fmt::Debug for FeedRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistryClient")
            .field("feed_url", &self.feed_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl FeedRegistryClient {
    pub fn new(feed_url: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            feed_url: feed_url.into(),
            transport,
            retry: RetryPolicy::default(),
            cache: Mutex::new(None),
        }
    }

    /// Set the retry policy (builder pattern).
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The cached feed, downloading it on first call.
    pub fn feed(&self) -> EngineResult<Arc<Feed>> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| EngineError::Config("registry cache lock poisoned".to_string()))?;
        if let Some(cached) = cache.as_ref() {
            return cached.clone();
        }

        let loaded = self
            .retry
            .run(&self.feed_url, |attempt| {
                debug!(url = %self.feed_url, attempt, "downloading registry feed");
                let bytes = self.transport.read_to_end(&self.feed_url, MAX_FEED_BYTES)?;
                Feed::parse(&self.feed_url, &bytes)
            })
            .map(Arc::new);

        match &loaded {
            Ok(feed) => debug!(
                url = %self.feed_url,
                components = feed.components.len(),
                "registry feed loaded"
            ),
            Err(e) => warn!(url = %self.feed_url, error = %e, "registry feed unavailable"),
        }
        *cache = Some(loaded.clone());
        loaded
    }
}

impl RegistryClient for FeedRegistryClient {
    fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> EngineResult<ReleaseDescriptor> {
        self.feed()?.resolve(name, constraint)
    }

    fn releases(&self, name: &str) -> EngineResult<Vec<ReleaseDescriptor>> {
        self.feed()?.releases(name)
    }
}

/// Registry over an in-memory feed.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    feed: Feed,
}

impl StaticRegistry {
    pub fn new(feed: Feed) -> Self {
        Self { feed }
    }
}

impl RegistryClient for StaticRegistry {
    fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> EngineResult<ReleaseDescriptor> {
        self.feed.resolve(name, constraint)
    }

    fn releases(&self, name: &str) -> EngineResult<Vec<ReleaseDescriptor>> {
        self.feed.releases(name)
    }
}
