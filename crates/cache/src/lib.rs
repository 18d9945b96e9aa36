//! Panofeed Cache Library
//!
//! Image cache keyed by resolved URL, with LRU eviction, an in-flight table
//! that de-duplicates fetches, and ready/failure notifications.

pub mod config;
pub mod fetch;
pub mod image;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::{CacheConfig, ConfigError};
pub use fetch::{CancellationToken, FetchCompletion, FetchError, ImageFetcher};
pub use image::{
    CacheEvent, CacheStats, EntryState, ImageCache, ImageCacheEntry, RequestOutcome, Subscription,
    DEFAULT_CACHE_CAPACITY,
};
