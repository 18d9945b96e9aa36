//! Shared image cache with LRU eviction
//!
//! Tracks the load state of every resolved image URL the feed has touched.
//! The cache doubles as the in-flight table: a `Pending` entry means some
//! fetch is already on the wire, so later requests for the same URL resolve
//! without issuing another one.
//!
//! Ready, failed and abandoned transitions are broadcast to subscribers so
//! mounted media loaders referencing the same URL can update without polling.

use crate::config::CacheConfig;
use crate::fetch::{CancellationToken, FetchCompletion, FetchError, ImageFetcher};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Default number of entries kept before least-recently-used eviction.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Load state of a cached image URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// A fetch has been issued and has not completed
    Pending,

    /// The full asset loaded successfully
    Ready,

    /// The last fetch failed
    Failed,
}

/// A snapshot of one cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCacheEntry {
    /// Resolved URL
    pub key: String,

    /// Current load state
    pub state: EntryState,
}

/// Notification published whenever a URL leaves the pending state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The URL finished loading
    Ready { key: String },

    /// The URL failed to load
    Failed { key: String, reason: String },

    /// The fetch was dropped before settling; the URL is no longer tracked
    /// and anyone still waiting on it has to request it again
    Abandoned { key: String },
}

impl CacheEvent {
    pub fn key(&self) -> &str {
        match self {
            CacheEvent::Ready { key }
            | CacheEvent::Failed { key, .. }
            | CacheEvent::Abandoned { key } => key,
        }
    }
}

/// What `ImageCache::request` did with a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Already loaded; nothing was fetched
    AlreadyReady,

    /// A fetch is already in flight; nothing new was fetched
    AlreadyPending,

    /// A new fetch was handed to the fetcher
    Started,
}

impl RequestOutcome {
    pub fn started_fetch(&self) -> bool {
        matches!(self, RequestOutcome::Started)
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries currently cached (any state)
    pub entry_count: usize,

    /// Maximum number of entries
    pub capacity: usize,

    /// Requests answered without a new fetch
    pub hits: u64,

    /// Requests that started a fetch
    pub misses: u64,

    /// Fetches handed to a fetcher
    pub fetches_started: u64,

    /// Fetches that completed successfully
    pub fetches_ready: u64,

    /// Fetches that failed
    pub fetches_failed: u64,

    /// Fetches dropped before completing
    pub fetches_aborted: u64,

    /// Entries evicted due to capacity pressure
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Receiving end of the cache's event stream
///
/// Dropping the subscription unsubscribes it; the cache prunes closed
/// channels the next time it publishes.
pub struct Subscription {
    receiver: Receiver<CacheEvent>,
}

impl Subscription {
    /// Take the next queued event without blocking
    pub fn try_next(&self) -> Option<CacheEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain all queued events
    pub fn drain(&self) -> Vec<CacheEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}

/// Internal cache state
struct CacheState {
    entries: HashMap<String, EntryState>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<String>,

    capacity: usize,

    subscribers: Vec<Sender<CacheEvent>>,

    stats: CacheStats,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            capacity,
            subscribers: Vec::new(),
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    /// Move a key to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn set(&mut self, key: &str, state: EntryState) {
        self.entries.insert(key.to_string(), state);
        self.touch(key);
        self.evict_to_fit();
        self.stats.entry_count = self.entries.len();
    }

    /// Evict least recently used settled entries until within capacity
    ///
    /// Pending entries are skipped: dropping them would let a duplicate
    /// fetch start while the first is still on the wire.
    fn evict_to_fit(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self
                .lru_queue
                .iter()
                .position(|k| self.entries.get(k) != Some(&EntryState::Pending));
            let Some(position) = victim else {
                break;
            };
            if let Some(key) = self.lru_queue.remove(position) {
                self.entries.remove(&key);
                self.stats.evictions += 1;
                log::trace!("evicted {key} from image cache");
            }
        }
        self.stats.entry_count = self.entries.len();
    }

    fn remove(&mut self, key: &str) -> Option<EntryState> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.lru_queue.retain(|k| k != key);
            self.stats.entry_count = self.entries.len();
        }
        removed
    }

    fn publish(&mut self, event: CacheEvent) {
        self.subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

/// Image cache with LRU eviction and ready notifications
///
/// Cloning an `ImageCache` yields another handle to the same cache. Each feed
/// (and each test) creates its own instance rather than sharing global state.
///
/// # Example
///
/// ```
/// use panofeed_cache::{EntryState, ImageCache};
///
/// let cache = ImageCache::new(128);
/// let events = cache.subscribe();
///
/// cache.mark_ready("https://cdn.example/a.jpg");
/// assert_eq!(cache.peek("https://cdn.example/a.jpg"), Some(EntryState::Ready));
/// assert_eq!(events.drain().len(), 1);
/// ```
#[derive(Clone)]
pub struct ImageCache {
    state: Arc<Mutex<CacheState>>,
}

impl ImageCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::new(capacity))),
        }
    }

    /// Create a cache from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Every mutation leaves the state consistent, so a poisoned lock is
        // still safe to read through.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ensure `key` is loaded or loading
    ///
    /// Ready and pending keys resolve immediately without touching the
    /// fetcher. Unknown and failed keys are marked pending and handed to
    /// `fetcher`; the lock is released before the fetcher runs, so a fetcher
    /// may complete synchronously.
    pub fn request(&self, key: &str, fetcher: &dyn ImageFetcher) -> RequestOutcome {
        self.request_with_token(key, fetcher, CancellationToken::new())
    }

    /// Like [`ImageCache::request`], attaching a cancellation token that the
    /// fetcher may observe through its completion.
    pub fn request_with_token(
        &self,
        key: &str,
        fetcher: &dyn ImageFetcher,
        token: CancellationToken,
    ) -> RequestOutcome {
        {
            let mut state = self.lock();
            match state.entries.get(key).copied() {
                Some(EntryState::Ready) => {
                    state.touch(key);
                    state.stats.hits += 1;
                    log::trace!("image cache hit for {key}");
                    return RequestOutcome::AlreadyReady;
                }
                Some(EntryState::Pending) => {
                    state.stats.hits += 1;
                    return RequestOutcome::AlreadyPending;
                }
                Some(EntryState::Failed) | None => {
                    state.stats.misses += 1;
                    state.stats.fetches_started += 1;
                    state.set(key, EntryState::Pending);
                }
            }
        }

        fetcher.fetch(key, FetchCompletion::new(self.clone(), key.to_string(), token));
        RequestOutcome::Started
    }

    /// Record a successful load and notify subscribers
    ///
    /// Idempotent: completing an already-ready key publishes nothing. A
    /// completion that arrives after its entry was evicted or removed still
    /// repopulates the cache.
    pub fn mark_ready(&self, key: &str) {
        let mut state = self.lock();
        if state.entries.get(key) == Some(&EntryState::Ready) {
            state.touch(key);
            return;
        }
        state.stats.fetches_ready += 1;
        state.set(key, EntryState::Ready);
        state.publish(CacheEvent::Ready {
            key: key.to_string(),
        });
    }

    /// Record a failed load and notify subscribers
    ///
    /// A failure never downgrades an entry that is already ready.
    pub fn mark_failed(&self, key: &str, error: &FetchError) {
        let mut state = self.lock();
        if state.entries.get(key) == Some(&EntryState::Ready) {
            return;
        }
        state.stats.fetches_failed += 1;
        state.set(key, EntryState::Failed);
        state.publish(CacheEvent::Failed {
            key: key.to_string(),
            reason: error.to_string(),
        });
    }

    /// Forget a pending fetch that was abandoned so the key can be requested
    /// again, telling subscribers that were waiting on it
    pub(crate) fn abandon(&self, key: &str) {
        let mut state = self.lock();
        if state.entries.get(key) == Some(&EntryState::Pending) {
            state.remove(key);
            state.stats.fetches_aborted += 1;
            log::debug!("fetch for {key} abandoned");
            state.publish(CacheEvent::Abandoned {
                key: key.to_string(),
            });
        }
    }

    /// Subscribe to ready, failure and abandon notifications
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel();
        self.lock().subscribers.push(sender);
        Subscription { receiver }
    }

    /// Look up an entry, updating LRU tracking
    pub fn get(&self, key: &str) -> Option<ImageCacheEntry> {
        let mut state = self.lock();
        let entry_state = state.entries.get(key).copied()?;
        state.touch(key);
        Some(ImageCacheEntry {
            key: key.to_string(),
            state: entry_state,
        })
    }

    /// Look up an entry's state without updating LRU tracking
    pub fn peek(&self, key: &str) -> Option<EntryState> {
        self.lock().entries.get(key).copied()
    }

    pub fn is_ready(&self, key: &str) -> bool {
        self.peek(key) == Some(EntryState::Ready)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Remove an entry from the cache
    pub fn remove(&self, key: &str) -> Option<EntryState> {
        self.lock().remove(key)
    }

    /// Drop every settled entry; pending fetches stay tracked
    pub fn clear(&self) {
        let mut state = self.lock();
        state
            .entries
            .retain(|_, entry_state| *entry_state == EntryState::Pending);
        let CacheState {
            entries,
            lru_queue,
            ..
        } = &mut *state;
        lru_queue.retain(|k| entries.contains_key(k));
        state.stats.entry_count = state.entries.len();
    }

    /// Change the capacity, evicting immediately if the cache is over it
    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.lock();
        state.capacity = capacity.max(1);
        state.stats.capacity = state.capacity;
        state.evict_to_fit();
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|state| **state == EntryState::Pending)
            .count()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingFetcher;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const A: &str = "https://cdn.example/a.jpg";
    const B: &str = "https://cdn.example/b.jpg";
    const C: &str = "https://cdn.example/c.jpg";

    #[test]
    fn test_request_starts_single_fetch() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();

        assert_eq!(cache.request(A, &fetcher), RequestOutcome::Started);
        assert_eq!(cache.request(A, &fetcher), RequestOutcome::AlreadyPending);
        assert_eq!(fetcher.call_count(A), 1);
        assert_eq!(cache.peek(A), Some(EntryState::Pending));
    }

    #[test]
    fn test_resolving_twice_yields_same_ready_entry() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        assert!(fetcher.complete(A));

        let first = cache.get(A).unwrap();
        assert_eq!(cache.request(A, &fetcher), RequestOutcome::AlreadyReady);
        let second = cache.get(A).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.state, EntryState::Ready);
        assert_eq!(fetcher.call_count(A), 1);
    }

    #[test]
    fn test_failed_entry_can_be_requested_again() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        fetcher.fail(A, "connection reset");
        assert_eq!(cache.peek(A), Some(EntryState::Failed));

        assert_eq!(cache.request(A, &fetcher), RequestOutcome::Started);
        assert_eq!(fetcher.call_count(A), 2);
    }

    #[test]
    fn test_subscribers_receive_ready_and_failed() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let events = cache.subscribe();

        cache.request(A, &fetcher);
        cache.request(B, &fetcher);
        fetcher.complete(A);
        fetcher.fail(B, "404");

        let received = events.drain();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], CacheEvent::Ready { key: A.to_string() });
        assert!(matches!(&received[1], CacheEvent::Failed { key, .. } if key == B));
    }

    #[test]
    fn test_abandoned_fetch_is_announced() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let events = cache.subscribe();

        cache.request(A, &fetcher);
        assert!(fetcher.abort(A));
        // Only a pending entry can be abandoned
        cache.mark_ready(B);
        cache.abandon(B);

        let received = events.drain();
        assert_eq!(
            received,
            vec![
                CacheEvent::Abandoned { key: A.to_string() },
                CacheEvent::Ready { key: B.to_string() },
            ]
        );
        assert_eq!(received[0].key(), A);
        assert!(cache.is_ready(B));
    }

    #[test]
    fn test_mark_ready_is_idempotent() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();

        cache.mark_ready(A);
        cache.mark_ready(A);

        assert_eq!(events.drain().len(), 1);
        assert_eq!(cache.stats().fetches_ready, 1);
    }

    #[test]
    fn test_failure_does_not_downgrade_ready() {
        let cache = ImageCache::new(16);
        cache.mark_ready(A);
        cache.mark_failed(A, &FetchError::Network("late".into()));
        assert_eq!(cache.peek(A), Some(EntryState::Ready));
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        drop(events);

        cache.mark_ready(A);
        assert!(cache.lock().subscribers.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = ImageCache::new(2);

        cache.mark_ready(A);
        cache.mark_ready(B);
        cache.mark_ready(C);

        assert!(!cache.contains(A));
        assert!(cache.contains(B));
        assert!(cache.contains(C));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_ordering() {
        let cache = ImageCache::new(2);

        cache.mark_ready(A);
        cache.mark_ready(B);

        // Access A so B becomes least recently used
        cache.get(A);
        cache.mark_ready(C);

        assert!(cache.contains(A));
        assert!(!cache.contains(B));
        assert!(cache.contains(C));
    }

    #[test]
    fn test_pending_entries_are_not_evicted() {
        let cache = ImageCache::new(1);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        cache.mark_ready(B);

        // A is pending and oldest; B is the only evictable entry.
        assert_eq!(cache.peek(A), Some(EntryState::Pending));
        assert!(!cache.contains(B));
        assert_eq!(cache.request(A, &fetcher), RequestOutcome::AlreadyPending);
        assert_eq!(fetcher.call_count(A), 1);
    }

    #[test]
    fn test_stale_completion_repopulates_after_removal() {
        let cache = ImageCache::new(4);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        cache.remove(A);
        fetcher.complete(A);

        assert!(cache.is_ready(A));
    }

    #[test]
    fn test_clear_keeps_pending() {
        let cache = ImageCache::new(8);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        cache.mark_ready(B);
        cache.clear();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(A), Some(EntryState::Pending));
    }

    #[test]
    fn test_set_capacity_evicts() {
        let cache = ImageCache::new(8);
        cache.mark_ready(A);
        cache.mark_ready(B);
        cache.mark_ready(C);

        cache.set_capacity(1);

        assert_eq!(cache.len(), 1);
        assert!(cache.contains(C));
    }

    #[test]
    fn test_stats() {
        let cache = ImageCache::new(8);
        let fetcher = RecordingFetcher::new();

        cache.request(A, &fetcher);
        cache.request(A, &fetcher);
        fetcher.complete(A);
        cache.request(A, &fetcher);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.fetches_started, 1);
        assert_eq!(stats.fetches_ready, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_synchronous_fetcher_does_not_deadlock() {
        let cache = ImageCache::new(8);
        let fetcher = RecordingFetcher::resolving_immediately();

        assert_eq!(cache.request(A, &fetcher), RequestOutcome::Started);
        assert!(cache.is_ready(A));
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(ImageCache::default().capacity(), DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_capacity_bounded_under_random_traffic() {
        let mut rng = StdRng::seed_from_u64(7);
        let cache = ImageCache::new(32);
        let fetcher = RecordingFetcher::new();

        for _ in 0..2_000 {
            let key = format!("https://cdn.example/{}.jpg", rng.gen_range(0..200));
            cache.request(&key, &fetcher);
            if rng.gen_bool(0.8) {
                fetcher.complete(&key);
            } else {
                fetcher.fail(&key, "timeout");
            }
            assert!(cache.len() <= 32);
        }

        assert_eq!(cache.pending_count(), 0);
    }
}
