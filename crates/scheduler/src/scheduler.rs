//! Prefetch scheduler implementation
//!
//! Turns focus changes into prioritized, generation-stamped requests that
//! warm the image cache for neighboring posts.

use crate::cancel::{CancellationRegistry, Generation, GenerationCounter};
use crate::priority::{DelayedQueue, PrefetchPriority, PrefetchRequest};
use crate::viewport::NeighborPlanner;
use panofeed_cache::{CancellationToken, EntryState, ImageCache, ImageFetcher};
use panofeed_model::{FeedItem, FeedItemId, ImageContext, VariantResolver};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default debounce before the far (`focus + 2`) request is issued
pub const DEFAULT_FAR_PREFETCH_DELAY: Duration = Duration::from_millis(1000);

/// Default number of media entries warmed per post
pub const DEFAULT_PREFETCH_MEDIA_LIMIT: usize = 5;

/// What happens to fetches issued for a superseded focus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationMode {
    /// Stale work is skipped before it starts; in-flight fetches run to
    /// completion and still populate the cache.
    #[default]
    Advisory,

    /// In-flight fetches of superseded generations have their tokens
    /// cancelled. Fetchers that honor the token abort the load.
    Abort,
}

impl fmt::Display for CancellationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancellationMode::Advisory => f.write_str("advisory"),
            CancellationMode::Abort => f.write_str("abort"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown cancellation mode '{0}' (expected 'advisory' or 'abort')")]
pub struct ParseCancellationModeError(String);

impl FromStr for CancellationMode {
    type Err = ParseCancellationModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Ok(CancellationMode::Advisory),
            "abort" => Ok(CancellationMode::Abort),
            other => Err(ParseCancellationModeError(other.to_string())),
        }
    }
}

/// Tunables for [`PrefetchScheduler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchConfig {
    pub far_delay: Duration,
    pub media_limit: usize,

    /// Context post media are shown in; media are only warmed when its
    /// preset allows preloading
    pub media_context: ImageContext,

    pub cancellation: CancellationMode,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            far_delay: DEFAULT_FAR_PREFETCH_DELAY,
            media_limit: DEFAULT_PREFETCH_MEDIA_LIMIT,
            media_context: ImageContext::FeedFull,
            cancellation: CancellationMode::Advisory,
        }
    }
}

/// Prefetch scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Focus changes observed
    pub focus_changes: u64,

    /// Requests executed against the cache
    pub requests_issued: u64,

    /// Far requests placed in the delayed queue
    pub far_scheduled: u64,

    /// Requests dropped because their generation was superseded
    pub stale_dropped: u64,

    /// Requests skipped because the post was already prefetched
    pub duplicate_posts: u64,

    /// Requests skipped because the feed changed under them
    pub missing_posts: u64,

    /// Network fetches actually started (cache misses)
    pub fetches_started: u64,

    /// Tokens cancelled in abort mode
    pub tokens_cancelled: u64,
}

/// Focus-driven prefetch scheduler
///
/// Immediate (`focus + 1`) and near (`focus - 1`) requests are issued
/// synchronously inside [`PrefetchScheduler::on_focus_change`]. The far
/// request (`focus + 2`) waits for the debounce delay and is issued by
/// [`PrefetchScheduler::poll`] only if no newer focus change happened in
/// between.
///
/// # Example
///
/// ```
/// use panofeed_cache::{ImageCache, testing::RecordingFetcher};
/// use panofeed_model::{FeedItem, MediaRef, PreviewVariantResolver};
/// use panofeed_scheduler::{PrefetchConfig, PrefetchScheduler};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let items: Vec<FeedItem> = (0..10)
///     .map(|i| FeedItem::new(format!("post-{i}"), vec![MediaRef::new(format!("https://cdn.example/{i}.jpg"))]))
///     .collect();
///
/// let fetcher = Arc::new(RecordingFetcher::new());
/// let mut scheduler = PrefetchScheduler::new(
///     ImageCache::default(),
///     fetcher.clone(),
///     Arc::new(PreviewVariantResolver),
///     PrefetchConfig::default(),
/// );
///
/// let now = Instant::now();
/// scheduler.on_focus_change(3, &items, now);
/// assert_eq!(fetcher.calls(), vec!["https://cdn.example/4.jpg", "https://cdn.example/2.jpg"]);
///
/// scheduler.poll(now + Duration::from_secs(1), &items);
/// assert_eq!(fetcher.call_count("https://cdn.example/5.jpg"), 1);
/// ```
pub struct PrefetchScheduler {
    cache: ImageCache,
    fetcher: Arc<dyn ImageFetcher>,
    resolver: Arc<dyn VariantResolver>,
    config: PrefetchConfig,
    planner: NeighborPlanner,
    generations: GenerationCounter,
    cancellation: CancellationRegistry,
    delayed: DelayedQueue,
    /// URLs warmed per post, kept to tell when the cache has dropped them
    prefetched_posts: HashMap<FeedItemId, Vec<String>>,
    issued_urls: HashSet<String>,
    stats: SchedulerStats,
}

impl PrefetchScheduler {
    pub fn new(
        cache: ImageCache,
        fetcher: Arc<dyn ImageFetcher>,
        resolver: Arc<dyn VariantResolver>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            resolver,
            config,
            planner: NeighborPlanner::new(0),
            generations: GenerationCounter::new(),
            cancellation: CancellationRegistry::new(),
            delayed: DelayedQueue::new(),
            prefetched_posts: HashMap::new(),
            issued_urls: HashSet::new(),
            stats: SchedulerStats::default(),
        }
    }

    /// Plan and issue prefetches for a new focus index
    ///
    /// Bumps the generation, so every far request still waiting from an
    /// earlier focus becomes stale. Returns the new generation.
    pub fn on_focus_change(
        &mut self,
        focus: usize,
        items: &[FeedItem],
        now: Instant,
    ) -> Generation {
        self.planner.update_item_count(items.len());
        let generation = self.generations.advance();
        self.stats.focus_changes += 1;

        if self.config.cancellation == CancellationMode::Abort {
            let cancelled = self.cancellation.cancel_before(generation);
            if cancelled > 0 {
                log::debug!("cancelled {cancelled} superseded prefetch token(s)");
            }
            self.stats.tokens_cancelled += cancelled as u64;
        }

        for planned in self.planner.plan(focus) {
            let Some(item) = items.get(planned.index) else {
                continue;
            };
            let request = PrefetchRequest {
                key: item.id.to_string(),
                index: planned.index,
                priority: planned.priority,
                generation,
            };

            if planned.priority.is_delayed() {
                self.stats.far_scheduled += 1;
                self.delayed.push(request, now + self.config.far_delay);
            } else {
                self.execute(request, items);
            }
        }

        log::debug!("prefetch plan for focus {focus} (generation {generation})");
        generation
    }

    /// Issue every delayed request whose deadline has passed
    ///
    /// Requests from superseded generations are dropped. Returns the number
    /// of requests issued.
    pub fn poll(&mut self, now: Instant, items: &[FeedItem]) -> usize {
        let current = self.generations.current();
        let mut issued = 0;

        while let Some(request) = self.delayed.pop_due(now) {
            if self.generations.is_stale(request.generation) {
                self.stats.stale_dropped += 1;
                log::trace!(
                    "dropping stale {:?} prefetch for index {} (generation {} < {current})",
                    request.priority,
                    request.index,
                    request.generation
                );
                continue;
            }
            if self.execute(request, items) {
                issued += 1;
            }
        }

        issued
    }

    /// Warm the cache for one request
    ///
    /// Returns `true` if the post was processed.
    fn execute(&mut self, request: PrefetchRequest, items: &[FeedItem]) -> bool {
        let item = match items.get(request.index) {
            Some(item) if item.id.as_str() == request.key => item,
            _ => {
                self.stats.missing_posts += 1;
                return false;
            }
        };

        // A post stays warm until the cache evicts one of its URLs
        if let Some(urls) = self.prefetched_posts.get(&item.id) {
            if urls.iter().all(|url| self.cache.contains(url)) {
                self.stats.duplicate_posts += 1;
                return false;
            }
        }

        let token = match self.config.cancellation {
            CancellationMode::Advisory => CancellationToken::new(),
            CancellationMode::Abort => self.cancellation.register(request.generation),
        };

        let urls = item.prefetch_urls(
            self.config.media_context,
            self.config.media_limit,
            self.resolver.as_ref(),
        );
        let mut started = 0;
        for url in &urls {
            // Failed loads are only retried by a remount, never speculatively
            if self.cache.peek(url) == Some(EntryState::Failed) {
                continue;
            }
            let outcome = self
                .cache
                .request_with_token(url, self.fetcher.as_ref(), token.clone());
            if outcome.started_fetch() {
                started += 1;
                self.issued_urls.insert(url.clone());
            }
        }

        self.stats.requests_issued += 1;
        self.stats.fetches_started += started;
        log::debug!(
            "{:?} prefetch for post {} at index {}: {} url(s), {started} fetch(es) started",
            request.priority,
            request.key,
            request.index,
            urls.len()
        );
        self.prefetched_posts.insert(item.id.clone(), urls);
        self.prune_tracking();
        true
    }

    /// Keep per-post and per-URL bookkeeping no larger than the cache
    ///
    /// Entries whose URLs the cache no longer holds carry no information:
    /// the post is warmed again on its next request and a failure for the
    /// URL can only come from a new fetch.
    fn prune_tracking(&mut self) {
        let capacity = self.cache.capacity();
        let cache = &self.cache;
        if self.prefetched_posts.len() > capacity {
            self.prefetched_posts
                .retain(|_, urls| urls.iter().any(|url| cache.contains(url)));
        }
        if self.issued_urls.len() > capacity {
            self.issued_urls.retain(|url| cache.contains(url));
        }
    }

    /// Drop state tied to posts that are no longer in `items`
    ///
    /// Used after the feed has been replaced. Returns the number of delayed
    /// requests discarded.
    pub fn forget_missing_posts(&mut self, items: &[FeedItem]) -> usize {
        self.planner.update_item_count(items.len());

        let present: HashSet<&FeedItemId> = items.iter().map(|item| &item.id).collect();
        self.prefetched_posts.retain(|id, _| present.contains(id));

        self.delayed.remove_if(|request| {
            items
                .get(request.index)
                .map_or(true, |item| item.id.as_str() != request.key)
        })
    }

    /// Forget everything and invalidate all outstanding work
    pub fn reset(&mut self) {
        self.generations.advance();
        let cancelled = self.cancellation.cancel_all();
        self.stats.tokens_cancelled += cancelled as u64;
        self.delayed.clear();
        self.prefetched_posts.clear();
        self.issued_urls.clear();
    }

    /// Whether a prefetch from this scheduler started a fetch for `url`
    pub fn issued(&self, url: &str) -> bool {
        self.issued_urls.contains(url)
    }

    /// Whether the post has already been prefetched
    pub fn is_prefetched(&self, id: &FeedItemId) -> bool {
        self.prefetched_posts.contains_key(id)
    }

    /// Deadline of the next delayed request, for arming a host timer
    pub fn next_deadline(&self) -> Option<Instant> {
        self.delayed.next_deadline()
    }

    /// Delayed requests waiting for their deadline (stale ones included)
    pub fn pending_delayed(&self) -> usize {
        self.delayed.len()
    }

    pub fn generation(&self) -> Generation {
        self.generations.current()
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.config
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.clone()
    }

    /// Priority a feed index would get relative to `focus`
    pub fn priority_for(&self, focus: usize, index: usize) -> Option<PrefetchPriority> {
        self.planner.priority_for(focus, index)
    }
}

impl fmt::Debug for PrefetchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchScheduler")
            .field("config", &self.config)
            .field("generation", &self.generations.current())
            .field("pending_delayed", &self.delayed.len())
            .field("prefetched_posts", &self.prefetched_posts.len())
            .field("issued_urls", &self.issued_urls.len())
            .field("stats", &self.stats)
            .finish()
    }
}
