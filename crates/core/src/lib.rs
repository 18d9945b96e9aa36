//! Panofeed Core Library
//!
//! Windowed feed virtualization with predictive media loading.
//!
//! - [`WindowController`] maps scroll offset to a focused item and keeps
//!   `2b + 1` items mounted around it
//! - [`MediaLoader`] walks each mounted image from placeholder through an
//!   optional blurred preview to the full image
//! - [`FeedEngine`] ties both to the prefetch scheduler and the shared
//!   image cache

pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod refresh;
pub mod slots;
pub mod window;

pub use config::FeedConfig;
pub use engine::{EngineStats, FeedEngine, FeedEngineBuilder, MountedItem};
pub use error::{FeedError, FeedResult};
pub use media::{is_near_viewport, LoadState, MediaLayer, MediaLoader};
pub use refresh::{PullToRefresh, RefreshPhase, MAX_PULL_DISTANCE, PULL_THRESHOLD};
pub use slots::SlotArena;
pub use window::{
    focus_for_offset, mount_range, Placement, WindowChange, WindowController, WindowState,
};
