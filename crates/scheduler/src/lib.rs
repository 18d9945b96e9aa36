//! Panofeed Scheduler Library
//!
//! Focus-driven prefetching for the feed.
//!
//! When the focused item changes, neighbors are warmed in priority order:
//! the next item immediately, the previous item right after, and the item
//! two ahead once the user has stayed put for the debounce delay. Every
//! focus change bumps a generation counter; delayed work from an older
//! generation is dropped instead of issued.
//!
//! Scroll input is coalesced per animation frame by [`FrameThrottle`], and
//! [`ScrollActivity`] reports whether the user is still scrolling.
//!
//! # Example
//!
//! ```
//! use panofeed_scheduler::{NeighborPlanner, PrefetchPriority};
//!
//! let planner = NeighborPlanner::new(10);
//! let plan = planner.plan(3);
//! assert_eq!(plan[0].index, 4);
//! assert_eq!(plan[0].priority, PrefetchPriority::Immediate);
//! assert_eq!(plan[1].index, 2);
//! ```

mod cancel;
mod frame;
mod priority;
mod scheduler;
mod viewport;

// Re-export public API
pub use cancel::{CancellationRegistry, Generation, GenerationCounter};
pub use frame::{FrameThrottle, ScrollActivity, SCROLL_SETTLE_DELAY};
pub use priority::{DelayedQueue, PrefetchPriority, PrefetchRequest};
pub use scheduler::{
    CancellationMode, ParseCancellationModeError, PrefetchConfig, PrefetchScheduler,
    SchedulerStats, DEFAULT_FAR_PREFETCH_DELAY, DEFAULT_PREFETCH_MEDIA_LIMIT,
};
pub use viewport::{NeighborPlanner, PlannedPrefetch};
