//! Feed engine
//!
//! Wires the window controller, the prefetch scheduler and per-image load
//! state machines to a shared image cache. The host drives it from its
//! event loop:
//!
//! 1. scroll events → [`FeedEngine::on_scroll`], which asks for an
//!    animation frame at most once per frame
//! 2. the frame → [`FeedEngine::on_animation_frame`], which remounts and
//!    replans prefetches when focus moves
//! 3. timers → [`FeedEngine::poll`], which issues debounced prefetches and
//!    applies cache notifications
//! 4. image element callbacks → [`FeedEngine::on_media_loaded`] and
//!    [`FeedEngine::on_media_error`]

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedResult};
use crate::media::{is_near_viewport, LoadState, MediaLayer, MediaLoader};
use crate::refresh::PullToRefresh;
use crate::slots::SlotArena;
use crate::window::{Placement, WindowChange, WindowController};
use panofeed_cache::{
    CacheEvent, CacheStats, FetchError, ImageCache, ImageFetcher, Subscription,
};
use panofeed_model::{
    FeedItem, FeedItemId, ImageContext, MediaRef, PreviewVariantResolver, VariantResolver,
};
use panofeed_scheduler::{PrefetchScheduler, SchedulerStats, ScrollActivity};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Failures kept for [`FeedEngine::take_failures`]; older ones are dropped
const MAX_RECORDED_FAILURES: usize = 64;

type IndexChangeCallback = Box<dyn FnMut(usize)>;

/// Loaders for one mounted feed item
#[derive(Debug, Clone)]
pub struct MountedItem {
    pub index: usize,
    pub id: FeedItemId,

    /// One loader per media entry, in carousel order
    pub media: Vec<MediaLoader>,

    pub avatar: Option<MediaLoader>,
}

impl MountedItem {
    fn new(index: usize, item: &FeedItem, resolver: &dyn VariantResolver) -> Self {
        let mut mounted = Self {
            index,
            id: item.id.clone(),
            media: Vec::with_capacity(item.media.len()),
            avatar: None,
        };
        mounted.rebind(index, item, resolver);
        mounted
    }

    /// Point a recycled slot value at a new item, reusing its allocations
    fn rebind(&mut self, index: usize, item: &FeedItem, resolver: &dyn VariantResolver) {
        self.index = index;
        self.id.clone_from(&item.id);

        self.media.clear();
        self.media.extend(item.media.iter().map(|source| {
            MediaLoader::new(
                resolver.resolve(source, ImageContext::FeedFull),
                ImageContext::FeedFull,
            )
        }));

        self.avatar = item.author_avatar.as_ref().map(|url| {
            MediaLoader::new(
                resolver.resolve(&MediaRef::new(url.clone()), ImageContext::Avatar),
                ImageContext::Avatar,
            )
        });
    }

    fn loaders_mut(&mut self) -> impl Iterator<Item = &mut MediaLoader> {
        self.media.iter_mut().chain(self.avatar.iter_mut())
    }

    /// Drawable layer for each media entry
    pub fn layers(&self) -> Vec<MediaLayer> {
        self.media.iter().map(MediaLoader::layer).collect()
    }
}

/// Engine statistics
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Frames that changed the window
    pub window_changes: u64,
    pub mounts: u64,
    pub unmounts: u64,
    pub load_failures: u64,
    pub prefetch_failures: u64,
    pub scheduler: SchedulerStats,
    pub cache: CacheStats,
}

/// Builder for [`FeedEngine`]
pub struct FeedEngineBuilder {
    fetcher: Arc<dyn ImageFetcher>,
    viewport_height: f32,
    config: FeedConfig,
    cache: Option<ImageCache>,
    resolver: Arc<dyn VariantResolver>,
    initial_index: usize,
    on_index_change: Option<IndexChangeCallback>,
}

impl FeedEngineBuilder {
    pub fn config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a TOML file (if present) and the environment
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> FeedResult<Self> {
        self.config = FeedConfig::load(Some(path))?;
        Ok(self)
    }

    /// Share an existing cache instead of creating one from the config
    pub fn cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn VariantResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Start focused on `index` instead of the first item
    pub fn initial_index(mut self, index: usize) -> Self {
        self.initial_index = index;
        self
    }

    /// Called with the new focus index after every focus change
    pub fn on_index_change<F>(mut self, callback: F) -> Self
    where
        F: FnMut(usize) + 'static,
    {
        self.on_index_change = Some(Box::new(callback));
        self
    }

    /// Build the engine over `items`, mounting the initial window
    pub fn build(self, items: Vec<FeedItem>, now: Instant) -> FeedResult<FeedEngine> {
        self.config.validate()?;

        let cache = self
            .cache
            .unwrap_or_else(|| ImageCache::from_config(&self.config.cache));
        let events = cache.subscribe();
        let window = WindowController::with_initial_index(
            self.viewport_height,
            items.len(),
            self.config.buffer_size,
            self.initial_index,
        );
        let scheduler = PrefetchScheduler::new(
            cache.clone(),
            self.fetcher.clone(),
            self.resolver.clone(),
            self.config.prefetch_config(),
        );

        let mut engine = FeedEngine {
            slots: SlotArena::for_buffer(self.config.buffer_size),
            config: self.config,
            items,
            cache,
            fetcher: self.fetcher,
            resolver: self.resolver,
            window,
            scheduler,
            events,
            activity: ScrollActivity::default(),
            refresh: PullToRefresh::new(),
            on_index_change: self.on_index_change,
            failures: VecDeque::new(),
            stats: EngineStats::default(),
        };

        for index in engine.window.mounted().to_vec() {
            engine.mount(index);
        }
        engine.update_visibility();
        engine.promote_focused();
        if !engine.items.is_empty() {
            let focus = engine.window.focus();
            engine.scheduler.on_focus_change(focus, &engine.items, now);
        }
        engine.pump_cache_events();

        log::debug!(
            "feed engine started with {} item(s), focus {}",
            engine.items.len(),
            engine.window.focus()
        );
        Ok(engine)
    }
}

/// Virtualized feed with predictive media loading
///
/// # Example
///
/// ```
/// use panofeed_cache::testing::RecordingFetcher;
/// use panofeed_core::FeedEngine;
/// use panofeed_model::{FeedItem, MediaRef};
/// use std::sync::Arc;
/// use std::time::Instant;
///
/// let items: Vec<FeedItem> = (0..10)
///     .map(|i| FeedItem::new(format!("post-{i}"), vec![MediaRef::new(format!("https://cdn.example/{i}.jpg"))]))
///     .collect();
///
/// let now = Instant::now();
/// let mut engine = FeedEngine::builder(Arc::new(RecordingFetcher::new()), 800.0)
///     .build(items, now)
///     .unwrap();
/// assert_eq!(engine.mounted(), &[0, 1]);
///
/// if engine.on_scroll(4000.0, now) {
///     engine.on_animation_frame(now);
/// }
/// assert_eq!(engine.mounted(), &[4, 5, 6]);
///
/// let rendered = engine.render(|item, index, focused| format!("{}:{index}:{focused}", item.id));
/// assert_eq!(rendered[1].1, "post-5:5:true");
/// ```
pub struct FeedEngine {
    config: FeedConfig,
    items: Vec<FeedItem>,
    cache: ImageCache,
    fetcher: Arc<dyn ImageFetcher>,
    resolver: Arc<dyn VariantResolver>,
    window: WindowController,
    scheduler: PrefetchScheduler,
    slots: SlotArena<MountedItem>,
    events: Subscription,
    activity: ScrollActivity,
    refresh: PullToRefresh,
    on_index_change: Option<IndexChangeCallback>,
    failures: VecDeque<FeedError>,
    stats: EngineStats,
}

impl FeedEngine {
    pub fn builder(fetcher: Arc<dyn ImageFetcher>, viewport_height: f32) -> FeedEngineBuilder {
        FeedEngineBuilder {
            fetcher,
            viewport_height,
            config: FeedConfig::default(),
            cache: None,
            resolver: Arc::new(PreviewVariantResolver),
            initial_index: 0,
            on_index_change: None,
        }
    }

    // ---- host input -------------------------------------------------------

    /// Record a scroll event
    ///
    /// Returns `true` when the host should request an animation frame.
    pub fn on_scroll(&mut self, offset: f32, now: Instant) -> bool {
        self.activity.on_scroll(now);
        self.window.on_scroll(offset)
    }

    /// Recompute the window from the latest scroll offset
    pub fn on_animation_frame(&mut self, now: Instant) -> Option<WindowChange> {
        let change = self.window.on_animation_frame()?;
        self.apply_change(&change, now);
        Some(change)
    }

    /// Jump to an index without waiting for a frame
    pub fn scroll_to_index(&mut self, index: usize, now: Instant) -> Option<WindowChange> {
        let change = self.window.scroll_to_index(index)?;
        self.apply_change(&change, now);
        Some(change)
    }

    /// Issue debounced prefetches that are due and apply cache notifications
    ///
    /// Returns the number of prefetch requests issued.
    pub fn poll(&mut self, now: Instant) -> usize {
        let issued = self.scheduler.poll(now, &self.items);
        self.pump_cache_events();
        issued
    }

    /// Earliest instant at which [`FeedEngine::poll`] or
    /// [`FeedEngine::is_scrolling`] can change
    pub fn next_deadline(&self, now: Instant) -> Option<Instant> {
        let settle = self
            .activity
            .settles_at()
            .filter(|_| self.activity.is_active(now));
        match (self.scheduler.next_deadline(), settle) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Route cache notifications to mounted loaders
    ///
    /// Failures that moved no mounted loader came from prefetching; they are
    /// logged and otherwise ignored. A loader whose fetch was abandoned is
    /// mounted again so it re-requests the image. Returns the number of
    /// events processed.
    pub fn pump_cache_events(&mut self) -> usize {
        let events = self.events.drain();
        for event in &events {
            let mut observed = false;
            let mut newly_failed = Vec::new();

            for (index, mounted) in self.slots.iter_mut() {
                for loader in mounted.loaders_mut() {
                    if !loader.handle_event(event) {
                        continue;
                    }
                    observed = true;
                    match loader.state() {
                        LoadState::Failed => {
                            let reason = loader.failure().unwrap_or_default().to_string();
                            newly_failed.push((index, reason));
                        }
                        LoadState::Idle => {
                            log::debug!("re-requesting {} for index {index}", event.key());
                            loader.mount(&self.cache, self.fetcher.as_ref());
                        }
                        _ => {}
                    }
                }
            }

            for (index, reason) in newly_failed {
                self.record_load_failure(index, event.key(), reason);
            }

            if let CacheEvent::Failed { key, reason } = event {
                if !observed && self.scheduler.issued(key) {
                    self.stats.prefetch_failures += 1;
                    self.record(FeedError::PrefetchFailure {
                        key: key.clone(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        events.len()
    }

    /// Report an intersection change for one media entry
    pub fn set_media_visible(
        &mut self,
        index: usize,
        media_index: usize,
        visible: bool,
    ) -> Option<LoadState> {
        let loader = self.slots.get_mut(index)?.media.get_mut(media_index)?;
        Some(loader.set_visible(visible, &self.cache, self.fetcher.as_ref()))
    }

    /// The platform finished painting a media entry's full image
    pub fn on_media_loaded(&mut self, index: usize, media_index: usize) -> Option<LoadState> {
        let loader = self.slots.get_mut(index)?.media.get_mut(media_index)?;
        let state = loader.on_high_res_loaded(&self.cache);
        self.pump_cache_events();
        Some(state)
    }

    /// The platform failed to load a media entry
    pub fn on_media_error(
        &mut self,
        index: usize,
        media_index: usize,
        error: FetchError,
    ) -> Option<LoadState> {
        let loader = self.slots.get_mut(index)?.media.get_mut(media_index)?;
        let url = loader.variants().high_res.clone();
        let already_failed = loader.state() == LoadState::Failed;
        let state = loader.on_load_error(&self.cache, &error);
        if !already_failed {
            self.record_load_failure(index, &url, error.to_string());
        }
        self.pump_cache_events();
        Some(state)
    }

    /// Update the viewport height and reposition mounted items
    pub fn set_viewport_height(
        &mut self,
        viewport_height: f32,
        now: Instant,
    ) -> Option<WindowChange> {
        let change = self.window.set_viewport_height(viewport_height);
        match &change {
            Some(change) => self.apply_change(change, now),
            None => self.update_visibility(),
        }
        change
    }

    /// Replace the feed, as after a refresh
    ///
    /// Focus is clamped into the new list, mounted items whose post moved
    /// or disappeared are remounted, and prefetch state for posts that are
    /// gone is dropped.
    pub fn replace_items(&mut self, items: Vec<FeedItem>, now: Instant) -> Option<WindowChange> {
        self.items = items;
        self.scheduler.forget_missing_posts(&self.items);

        let stale: Vec<usize> = self
            .slots
            .iter()
            .filter(|(index, mounted)| {
                self.items
                    .get(*index)
                    .map_or(true, |item| item.id != mounted.id)
            })
            .map(|(index, _)| index)
            .collect();
        for index in stale {
            self.unmount(index);
        }

        let previous_focus = self.window.focus();
        let change = self.window.set_item_count(self.items.len());

        if let Some(change) = &change {
            for &index in &change.unmounted {
                self.unmount(index);
            }
        }
        for index in self.window.mounted().to_vec() {
            if !self.slots.contains(index) {
                self.mount(index);
            }
        }
        self.update_visibility();
        self.promote_focused();

        let focus = self.window.focus();
        if !self.items.is_empty() {
            self.scheduler.on_focus_change(focus, &self.items, now);
        }
        if focus != previous_focus {
            self.notify_index_change(focus);
        }
        self.pump_cache_events();
        change
    }

    // ---- pull to refresh --------------------------------------------------

    fn at_top(&self) -> bool {
        self.window.scroll_offset() <= 0.0 && self.window.focus() == 0
    }

    pub fn touch_start(&mut self, y: f32) {
        let at_top = self.at_top();
        self.refresh.touch_start(y, at_top);
    }

    /// Returns the pull indicator distance
    pub fn touch_move(&mut self, y: f32) -> f32 {
        let at_top = self.at_top();
        self.refresh.touch_move(y, at_top)
    }

    /// Returns `true` when the host should start refreshing
    pub fn touch_end(&mut self) -> bool {
        let triggered = self.refresh.touch_end();
        if triggered {
            log::debug!("pull to refresh triggered");
        }
        triggered
    }

    /// The host finished refreshing
    pub fn finish_refresh(&mut self) {
        self.refresh.finish();
    }

    pub fn pull_to_refresh(&self) -> &PullToRefresh {
        &self.refresh
    }

    // ---- rendering --------------------------------------------------------

    /// Invoke `render_item` once per mounted index, in index order
    pub fn render<T, F>(&self, mut render_item: F) -> Vec<(Placement, T)>
    where
        F: FnMut(&FeedItem, usize, bool) -> T,
    {
        let focus = self.window.focus();
        self.window
            .placements()
            .into_iter()
            .filter_map(|placement| {
                let item = self.items.get(placement.index)?;
                Some((placement, render_item(item, placement.index, placement.index == focus)))
            })
            .collect()
    }

    pub fn mounted_item(&self, index: usize) -> Option<&MountedItem> {
        self.slots.get(index)
    }

    /// Drawable layer of each media entry of a mounted item
    pub fn media_layers(&self, index: usize) -> Option<Vec<MediaLayer>> {
        self.slots.get(index).map(MountedItem::layers)
    }

    pub fn load_state(&self, index: usize, media_index: usize) -> Option<LoadState> {
        self.slots
            .get(index)?
            .media
            .get(media_index)
            .map(MediaLoader::state)
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.window.placements()
    }

    pub fn snap_points(&self) -> Vec<f32> {
        self.window.snap_points()
    }

    /// Snapping is suspended while a pull-to-refresh is in progress
    pub fn snap_enabled(&self) -> bool {
        self.refresh.snap_enabled()
    }

    pub fn container_height(&self) -> f32 {
        self.window.container_height()
    }

    /// Offset the host should scroll to on first layout
    pub fn initial_scroll_offset(&self) -> f32 {
        self.window.initial_scroll_offset()
    }

    /// Whether scroll events arrived within the settle delay
    ///
    /// Hosts suspend pointer interaction on items while this is `true`.
    pub fn is_scrolling(&self, now: Instant) -> bool {
        self.activity.is_active(now)
    }

    // ---- state ------------------------------------------------------------

    pub fn focus(&self) -> usize {
        self.window.focus()
    }

    pub fn mounted(&self) -> &[usize] {
        self.window.mounted()
    }

    pub fn items(&self) -> &[FeedItem] {
        &self.items
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn cache(&self) -> &ImageCache {
        &self.cache
    }

    pub fn window(&self) -> &WindowController {
        &self.window
    }

    pub fn scheduler(&self) -> &PrefetchScheduler {
        &self.scheduler
    }

    /// Take the load and prefetch failures recorded since the last call
    pub fn take_failures(&mut self) -> Vec<FeedError> {
        self.failures.drain(..).collect()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            scheduler: self.scheduler.stats(),
            cache: self.cache.stats(),
            ..self.stats.clone()
        }
    }

    // ---- internals --------------------------------------------------------

    fn apply_change(&mut self, change: &WindowChange, now: Instant) {
        self.stats.window_changes += 1;

        for &index in &change.unmounted {
            self.unmount(index);
        }
        for &index in &change.mounted {
            self.mount(index);
        }
        self.update_visibility();
        self.promote_focused();

        if change.focus_changed() {
            log::debug!("focus {} -> {}", change.previous_focus, change.focus);
            self.scheduler.on_focus_change(change.focus, &self.items, now);
            self.notify_index_change(change.focus);
        }
        self.pump_cache_events();
    }

    fn mount(&mut self, index: usize) {
        let Some(item) = self.items.get(index) else {
            return;
        };
        let resolver = self.resolver.as_ref();
        let displaced = self.slots.occupy(index, |recycled| match recycled {
            Some(mut mounted) => {
                mounted.rebind(index, item, resolver);
                mounted
            }
            None => MountedItem::new(index, item, resolver),
        });
        if let Some(displaced) = displaced {
            log::warn!("slot for index {index} was still held by index {displaced}");
        }

        if let Some(mounted) = self.slots.get_mut(index) {
            for loader in mounted.loaders_mut() {
                loader.mount(&self.cache, self.fetcher.as_ref());
            }
        }
        self.stats.mounts += 1;
        log::debug!("mounted index {index}");
    }

    fn unmount(&mut self, index: usize) {
        let Some(mounted) = self.slots.get_mut(index) else {
            return;
        };
        for loader in mounted.loaders_mut() {
            loader.reset();
        }
        self.slots.vacate(index);
        self.stats.unmounts += 1;
        log::debug!("unmounted index {index}");
    }

    /// Mark primary media near the viewport as visible
    fn update_visibility(&mut self) {
        let viewport_top = self.window.scroll_offset();
        let height = self.window.viewport_height();
        let margin = self.config.visibility_margin * height;

        for (index, mounted) in self.slots.iter_mut() {
            let top = self.window.item_offset(index);
            let near = is_near_viewport(top, height, viewport_top, height, margin);
            if let Some(primary) = mounted.media.first_mut() {
                if primary.is_visible() != near {
                    primary.set_visible(near, &self.cache, self.fetcher.as_ref());
                }
            }
        }
    }

    /// The focused item loads every media entry, not just the visible one
    fn promote_focused(&mut self) {
        let focus = self.window.focus();
        if let Some(mounted) = self.slots.get_mut(focus) {
            for loader in mounted.loaders_mut() {
                loader.promote(&self.cache, self.fetcher.as_ref());
            }
        }
    }

    fn notify_index_change(&mut self, focus: usize) {
        if let Some(callback) = self.on_index_change.as_mut() {
            callback(focus);
        }
    }

    fn record_load_failure(&mut self, index: usize, url: &str, reason: String) {
        self.stats.load_failures += 1;
        self.record(FeedError::LoadFailure {
            url: url.to_string(),
            reason,
        });
        log::debug!("media for index {index} switched to fallback");
    }

    fn record(&mut self, error: FeedError) {
        log::warn!("{error}");
        if self.failures.len() == MAX_RECORDED_FAILURES {
            self.failures.pop_front();
        }
        self.failures.push_back(error);
    }
}

impl fmt::Debug for FeedEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedEngine")
            .field("items", &self.items.len())
            .field("window", &self.window.state())
            .field("scheduler", &self.scheduler)
            .field("stats", &self.stats)
            .finish()
    }
}
