//! Animation-frame coalescing for scroll input
//!
//! Scroll events can arrive many times per frame. [`FrameThrottle`] keeps
//! only the latest offset and asks the host for a single animation frame;
//! the window is recomputed once when that frame runs.
//!
//! [`ScrollActivity`] tracks whether the user is actively scrolling, settling
//! a fixed quiet period after the last scroll event.

use std::time::{Duration, Instant};

/// Quiet period after the last scroll event before scrolling counts as settled
pub const SCROLL_SETTLE_DELAY: Duration = Duration::from_millis(150);

/// Coalesces scroll offsets into at most one recompute per animation frame
///
/// # Example
///
/// ```
/// use panofeed_scheduler::FrameThrottle;
///
/// let mut throttle = FrameThrottle::new();
///
/// // Only the first event of a frame asks for an animation frame
/// assert!(throttle.push(120.0));
/// assert!(!throttle.push(240.0));
///
/// // The frame sees the latest offset only
/// assert_eq!(throttle.take(), Some(240.0));
/// assert_eq!(throttle.take(), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FrameThrottle {
    /// Latest offset received since the last frame
    pending: Option<f32>,

    /// Whether an animation frame has been requested and not yet run
    ticking: bool,

    /// Scroll events received
    events: u64,

    /// Frames that performed a recompute
    frames: u64,
}

impl FrameThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scroll offset
    ///
    /// Returns `true` when the caller must request an animation frame, which
    /// happens only for the first event since the last frame ran.
    pub fn push(&mut self, offset: f32) -> bool {
        self.events += 1;
        self.pending = Some(offset);
        if self.ticking {
            false
        } else {
            self.ticking = true;
            true
        }
    }

    /// Run the animation frame, yielding the latest offset if any arrived
    pub fn take(&mut self) -> Option<f32> {
        self.ticking = false;
        let offset = self.pending.take()?;
        self.frames += 1;
        Some(offset)
    }

    /// Whether a frame has been requested and not yet run
    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    /// Number of scroll events recorded
    pub fn event_count(&self) -> u64 {
        self.events
    }

    /// Number of frames that produced a recompute
    pub fn frame_count(&self) -> u64 {
        self.frames
    }
}

/// Debounced "is the user scrolling" flag
#[derive(Debug, Clone)]
pub struct ScrollActivity {
    settle_delay: Duration,
    last_event: Option<Instant>,
}

impl ScrollActivity {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            settle_delay,
            last_event: None,
        }
    }

    /// Record a scroll event
    ///
    /// Returns `true` if this event started a new scrolling burst.
    pub fn on_scroll(&mut self, now: Instant) -> bool {
        let started = !self.is_active(now);
        self.last_event = Some(now);
        started
    }

    pub fn is_active(&self, now: Instant) -> bool {
        self.last_event
            .map(|last| now.saturating_duration_since(last) < self.settle_delay)
            .unwrap_or(false)
    }

    /// When the current burst settles, if one is in progress
    pub fn settles_at(&self) -> Option<Instant> {
        self.last_event.map(|last| last + self.settle_delay)
    }
}

impl Default for ScrollActivity {
    fn default() -> Self {
        Self::new(SCROLL_SETTLE_DELAY)
    }
}
