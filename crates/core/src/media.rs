//! Per-image loading state machine
//!
//! Each mounted image walks through:
//!
//! ```text
//! Idle ──mount (eager) / visible──▶ Loading ──low-res ready──▶ LowResVisible
//!  │                                   │                           │
//!  └──high-res already cached──┐       └──────high-res ready───────┤
//!                              ▼                                   ▼
//!                        HighResVisible ◀──────────────────────────┘
//!
//! any ──load error──▶ Failed (terminal until remount)
//! Loading / LowResVisible ──fetch abandoned──▶ Idle (mount again to retry)
//! ```
//!
//! Only one layer is ever rendered: the low-res preview is shown until the
//! high-res image paints and is dropped as soon as it does.

use panofeed_cache::{CacheEvent, FetchError, ImageCache, ImageFetcher};
use panofeed_model::{ImageContext, VariantPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Waiting to become visible
    Idle,

    /// Fetch in progress, placeholder shown
    Loading,

    /// Blurred preview shown while the full image loads
    LowResVisible,

    HighResVisible,

    /// Load failed; stays failed until the item is remounted
    Failed,
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::HighResVisible | LoadState::Failed)
    }
}

/// The single layer a loader wants drawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaLayer {
    Placeholder,
    LowRes(String),
    HighRes(String),
    Fallback,
}

/// Whether an element intersects the viewport grown by `margin` pixels on
/// both ends
pub fn is_near_viewport(
    element_top: f32,
    element_height: f32,
    viewport_top: f32,
    viewport_height: f32,
    margin: f32,
) -> bool {
    let element_bottom = element_top + element_height;
    let area_top = viewport_top - margin;
    let area_bottom = viewport_top + viewport_height + margin;
    element_bottom > area_top && element_top < area_bottom
}

/// Load state machine for one image instance
#[derive(Debug, Clone)]
pub struct MediaLoader {
    variants: VariantPair,
    context: ImageContext,
    high_priority: bool,
    state: LoadState,
    visible: bool,
    failure: Option<String>,
}

impl MediaLoader {
    pub fn new(variants: VariantPair, context: ImageContext) -> Self {
        Self {
            variants,
            context,
            high_priority: false,
            state: LoadState::Idle,
            visible: false,
            failure: None,
        }
    }

    /// Load without waiting for visibility, whatever the context preset says
    pub fn with_high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// Loads as soon as it is mounted
    pub fn is_eager(&self) -> bool {
        self.high_priority || self.context.is_eager()
    }

    fn uses_low_res(&self) -> bool {
        self.context.config().use_blur_preview && self.variants.has_distinct_low_res()
    }

    /// Mount the image
    ///
    /// A high-res URL that is already cached goes straight to
    /// [`LoadState::HighResVisible`]. Otherwise eager images start loading
    /// and lazy ones wait for [`MediaLoader::set_visible`].
    pub fn mount(&mut self, cache: &ImageCache, fetcher: &dyn ImageFetcher) -> LoadState {
        if self.state != LoadState::Idle {
            return self.state;
        }
        if cache.is_ready(&self.variants.high_res) {
            self.state = LoadState::HighResVisible;
        } else if self.is_eager() || self.visible {
            self.start(cache, fetcher);
        }
        self.state
    }

    /// Report an intersection change
    pub fn set_visible(
        &mut self,
        visible: bool,
        cache: &ImageCache,
        fetcher: &dyn ImageFetcher,
    ) -> LoadState {
        self.visible = visible;
        if visible && self.state == LoadState::Idle {
            self.mount(cache, fetcher);
        }
        self.state
    }

    /// Raise the image to high priority, starting it if it was waiting
    pub fn promote(&mut self, cache: &ImageCache, fetcher: &dyn ImageFetcher) -> LoadState {
        self.high_priority = true;
        self.mount(cache, fetcher)
    }

    fn start(&mut self, cache: &ImageCache, fetcher: &dyn ImageFetcher) {
        self.state = LoadState::Loading;
        log::trace!("loading {} ({:?})", self.variants.high_res, self.context);

        if self.uses_low_res() {
            cache.request(&self.variants.low_res, fetcher);
        }
        cache.request(&self.variants.high_res, fetcher);

        // Fetchers may settle synchronously
        self.sync_with_cache(cache);
    }

    fn sync_with_cache(&mut self, cache: &ImageCache) {
        if cache.is_ready(&self.variants.high_res) {
            self.state = LoadState::HighResVisible;
        } else if self.state == LoadState::Loading
            && self.uses_low_res()
            && cache.is_ready(&self.variants.low_res)
        {
            self.state = LoadState::LowResVisible;
        }
    }

    /// Apply a cache notification
    ///
    /// Returns `true` if the state changed. An abandoned full-size fetch puts
    /// the loader back to [`LoadState::Idle`]; the owner calls
    /// [`MediaLoader::mount`] again to re-request it.
    pub fn handle_event(&mut self, event: &CacheEvent) -> bool {
        let before = self.state;
        match event {
            CacheEvent::Ready { key } if *key == self.variants.high_res => {
                if matches!(
                    self.state,
                    LoadState::Idle | LoadState::Loading | LoadState::LowResVisible
                ) {
                    self.state = LoadState::HighResVisible;
                }
            }
            CacheEvent::Ready { key } if *key == self.variants.low_res => {
                if self.state == LoadState::Loading && self.uses_low_res() {
                    self.state = LoadState::LowResVisible;
                }
            }
            CacheEvent::Failed { key, reason } if *key == self.variants.high_res => {
                if matches!(self.state, LoadState::Loading | LoadState::LowResVisible) {
                    self.fail(reason.clone());
                }
            }
            CacheEvent::Abandoned { key } if *key == self.variants.high_res => {
                if matches!(self.state, LoadState::Loading | LoadState::LowResVisible) {
                    self.state = LoadState::Idle;
                }
            }
            // A failed or abandoned preview leaves the full image loading
            _ => {}
        }
        self.state != before
    }

    /// The platform painted the full image
    pub fn on_high_res_loaded(&mut self, cache: &ImageCache) -> LoadState {
        if self.state != LoadState::Failed {
            cache.mark_ready(&self.variants.high_res);
            self.state = LoadState::HighResVisible;
        }
        self.state
    }

    /// The platform could not load or decode the full image
    pub fn on_load_error(&mut self, cache: &ImageCache, error: &FetchError) -> LoadState {
        cache.mark_failed(&self.variants.high_res, error);
        self.fail(error.to_string());
        self.state
    }

    fn fail(&mut self, reason: String) {
        self.state = LoadState::Failed;
        self.failure = Some(reason);
    }

    /// Forget all progress, as on unmount
    pub fn reset(&mut self) {
        self.state = LoadState::Idle;
        self.visible = false;
        self.failure = None;
    }

    pub fn layer(&self) -> MediaLayer {
        match self.state {
            LoadState::Idle | LoadState::Loading => MediaLayer::Placeholder,
            LoadState::LowResVisible => MediaLayer::LowRes(self.variants.low_res.clone()),
            LoadState::HighResVisible => MediaLayer::HighRes(self.variants.high_res.clone()),
            LoadState::Failed => MediaLayer::Fallback,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn variants(&self) -> &VariantPair {
        &self.variants
    }

    pub fn context(&self) -> ImageContext {
        self.context
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Why the load failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panofeed_cache::testing::RecordingFetcher;

    const LOW: &str = "https://cdn.example/a_s.jpg";
    const HIGH: &str = "https://cdn.example/a.jpg";

    fn blur_loader() -> MediaLoader {
        MediaLoader::new(VariantPair::new(LOW, HIGH), ImageContext::FeedFull)
    }

    fn ready(key: &str) -> CacheEvent {
        CacheEvent::Ready {
            key: key.to_string(),
        }
    }

    #[test]
    fn test_lazy_image_waits_for_visibility() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();

        assert_eq!(loader.mount(&cache, &fetcher), LoadState::Idle);
        assert_eq!(fetcher.total_calls(), 0);

        assert_eq!(loader.set_visible(true, &cache, &fetcher), LoadState::Loading);
        assert_eq!(fetcher.calls(), vec![LOW, HIGH]);
        assert_eq!(loader.layer(), MediaLayer::Placeholder);
    }

    #[test]
    fn test_eager_context_loads_on_mount() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut avatar = MediaLoader::new(VariantPair::single(HIGH), ImageContext::Avatar);

        assert_eq!(avatar.mount(&cache, &fetcher), LoadState::Loading);
        assert_eq!(fetcher.calls(), vec![HIGH]);
    }

    #[test]
    fn test_high_priority_override_is_eager() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader().with_high_priority(true);

        assert!(loader.is_eager());
        assert_eq!(loader.mount(&cache, &fetcher), LoadState::Loading);
    }

    #[test]
    fn test_promote_starts_idle_image() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();

        loader.mount(&cache, &fetcher);
        assert_eq!(loader.promote(&cache, &fetcher), LoadState::Loading);
    }

    #[test]
    fn test_cached_high_res_mounts_straight_to_visible() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        cache.mark_ready(HIGH);

        let mut loader = blur_loader();
        assert_eq!(loader.mount(&cache, &fetcher), LoadState::HighResVisible);
        assert_eq!(loader.layer(), MediaLayer::HighRes(HIGH.to_string()));
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[test]
    fn test_blur_up_sequence() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();

        loader.set_visible(true, &cache, &fetcher);

        fetcher.complete(LOW);
        for event in events.drain() {
            loader.handle_event(&event);
        }
        assert_eq!(loader.state(), LoadState::LowResVisible);
        assert_eq!(loader.layer(), MediaLayer::LowRes(LOW.to_string()));

        fetcher.complete(HIGH);
        for event in events.drain() {
            loader.handle_event(&event);
        }
        assert_eq!(loader.state(), LoadState::HighResVisible);
        // The preview layer is gone once the full image is shown
        assert_eq!(loader.layer(), MediaLayer::HighRes(HIGH.to_string()));
    }

    #[test]
    fn test_no_low_res_without_blur_context() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = MediaLoader::new(VariantPair::new(LOW, HIGH), ImageContext::GridThumbnail);

        loader.set_visible(true, &cache, &fetcher);
        assert_eq!(fetcher.calls(), vec![HIGH]);

        cache.mark_ready(LOW);
        assert!(!loader.handle_event(&ready(LOW)));
        assert_eq!(loader.state(), LoadState::Loading);
    }

    #[test]
    fn test_high_res_before_low_res_skips_preview() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        assert!(loader.handle_event(&ready(HIGH)));
        assert!(!loader.handle_event(&ready(LOW)));
        assert_eq!(loader.state(), LoadState::HighResVisible);
    }

    #[test]
    fn test_synchronous_fetcher_settles_during_mount() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::resolving_immediately();
        let mut loader = blur_loader().with_high_priority(true);

        assert_eq!(loader.mount(&cache, &fetcher), LoadState::HighResVisible);
    }

    #[test]
    fn test_platform_load_marks_cache_ready() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        assert_eq!(loader.on_high_res_loaded(&cache), LoadState::HighResVisible);
        assert!(cache.is_ready(HIGH));

        // Another instance on the same URL skips the network
        let mut other = blur_loader();
        assert_eq!(other.mount(&cache, &fetcher), LoadState::HighResVisible);
        assert_eq!(fetcher.call_count(HIGH), 1);
    }

    #[test]
    fn test_failure_is_terminal_without_retry() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        fetcher.fail(HIGH, "connection reset");
        for event in events.drain() {
            loader.handle_event(&event);
        }
        assert_eq!(loader.state(), LoadState::Failed);
        assert_eq!(loader.layer(), MediaLayer::Fallback);
        assert!(loader.failure().is_some());

        // Nothing restarts it
        loader.set_visible(false, &cache, &fetcher);
        loader.set_visible(true, &cache, &fetcher);
        loader.mount(&cache, &fetcher);
        assert!(!loader.handle_event(&ready(HIGH)));
        assert_eq!(loader.state(), LoadState::Failed);
        assert_eq!(fetcher.call_count(HIGH), 1);
    }

    #[test]
    fn test_failed_preview_keeps_loading() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        fetcher.fail(LOW, "404");
        for event in events.drain() {
            loader.handle_event(&event);
        }
        assert_eq!(loader.state(), LoadState::Loading);
    }

    #[test]
    fn test_abandoned_fetch_returns_to_idle_and_remount_retries() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        fetcher.complete(LOW);
        fetcher.abort(HIGH);
        for event in events.drain() {
            loader.handle_event(&event);
        }
        assert_eq!(loader.state(), LoadState::Idle);
        assert!(loader.is_visible());

        // Still visible, so mounting again re-requests the full image and
        // brings the cached preview straight back
        assert_eq!(loader.mount(&cache, &fetcher), LoadState::LowResVisible);
        assert_eq!(fetcher.call_count(HIGH), 2);
        assert_eq!(fetcher.call_count(LOW), 1);
    }

    #[test]
    fn test_abandoned_preview_keeps_loading() {
        let cache = ImageCache::new(16);
        let events = cache.subscribe();
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        fetcher.abort(LOW);
        for event in events.drain() {
            assert!(!loader.handle_event(&event));
        }
        assert_eq!(loader.state(), LoadState::Loading);
    }

    #[test]
    fn test_platform_error_marks_cache_failed() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader();
        loader.set_visible(true, &cache, &fetcher);

        let state = loader.on_load_error(&cache, &FetchError::Decode("truncated".into()));
        assert_eq!(state, LoadState::Failed);
        assert_eq!(loader.on_high_res_loaded(&cache), LoadState::Failed);
    }

    #[test]
    fn test_reset_allows_reload_on_remount() {
        let cache = ImageCache::new(16);
        let fetcher = RecordingFetcher::new();
        let mut loader = blur_loader().with_high_priority(true);
        loader.mount(&cache, &fetcher);
        fetcher.fail(HIGH, "timeout");
        loader.handle_event(&CacheEvent::Failed {
            key: HIGH.to_string(),
            reason: "timeout".into(),
        });

        loader.reset();
        assert_eq!(loader.state(), LoadState::Idle);
        assert_eq!(loader.mount(&cache, &fetcher), LoadState::Loading);
        assert_eq!(fetcher.call_count(HIGH), 2);
    }

    #[test]
    fn test_near_viewport_margin() {
        let h = 800.0;
        // Item directly below the viewport, within half a viewport
        assert!(is_near_viewport(800.0, h, 0.0, h, 0.5 * h));
        assert!(is_near_viewport(1100.0, h, 0.0, h, 0.5 * h));
        assert!(!is_near_viewport(1200.0, h, 0.0, h, 0.5 * h));
        assert!(!is_near_viewport(800.0, h, 0.0, h, 0.0));
        // Above the viewport
        assert!(is_near_viewport(-1000.0, h, 0.0, h, 0.5 * h));
        assert!(!is_near_viewport(-1300.0, h, 0.0, h, 0.5 * h));
    }
}
