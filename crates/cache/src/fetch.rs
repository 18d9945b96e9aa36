//! Network boundary for image loads
//!
//! The cache never performs I/O itself. It hands each new URL to an
//! [`ImageFetcher`] together with a [`FetchCompletion`]; the fetcher settles
//! the completion whenever its load or error event fires, from whatever
//! event loop or thread it runs on.

use crate::image::ImageCache;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Why a fetch failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("decode error: {0}")]
    Decode(String),
}

/// Cancellation token for cooperative fetch cancellation
///
/// Fetchers may check `is_cancelled()` and abandon work early. Clones share
/// the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this token and all of its clones
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Starts network loads on behalf of the cache
pub trait ImageFetcher {
    /// Begin loading `url`, settling `completion` when the load ends
    ///
    /// Called at most once per URL while that URL is pending. There is no
    /// timeout: a completion that is held forever keeps the URL pending.
    fn fetch(&self, url: &str, completion: FetchCompletion);
}

impl<T: ImageFetcher + ?Sized> ImageFetcher for Arc<T> {
    fn fetch(&self, url: &str, completion: FetchCompletion) {
        (**self).fetch(url, completion)
    }
}

/// One-shot handle that reports the outcome of a fetch back to the cache
///
/// Dropping a completion without settling it abandons the fetch: the entry
/// leaves the pending state so a later request can try again, and
/// subscribers receive [`CacheEvent::Abandoned`](crate::CacheEvent::Abandoned).
pub struct FetchCompletion {
    cache: ImageCache,
    key: String,
    token: CancellationToken,
    settled: bool,
}

impl FetchCompletion {
    pub(crate) fn new(cache: ImageCache, key: String, token: CancellationToken) -> Self {
        Self {
            cache,
            key,
            token,
            settled: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether whoever issued this fetch no longer wants it
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The load event fired; the entry becomes ready
    pub fn succeed(mut self) {
        self.settled = true;
        self.cache.mark_ready(&self.key);
    }

    /// The error event fired; the entry becomes failed
    pub fn fail(mut self, error: FetchError) {
        self.settled = true;
        log::debug!("fetch for {} failed: {error}", self.key);
        self.cache.mark_failed(&self.key, &error);
    }

    /// The fetcher stopped the load (usually because it was cancelled)
    pub fn abort(mut self) {
        self.settled = true;
        self.cache.abandon(&self.key);
    }
}

impl Drop for FetchCompletion {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.abandon(&self.key);
        }
    }
}

impl std::fmt::Debug for FetchCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCompletion")
            .field("key", &self.key)
            .field("cancelled", &self.token.is_cancelled())
            .field("settled", &self.settled)
            .finish()
    }
}
