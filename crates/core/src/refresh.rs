//! Pull-to-refresh gesture tracking
//!
//! A pull can only start when the feed sits at the very top. The drag is
//! damped, capped, and must pass a threshold on release to trigger a
//! refresh, during which the indicator is held at the threshold.

/// Release distance that triggers a refresh, in pixels
pub const PULL_THRESHOLD: f32 = 80.0;

/// Damping applied to the raw drag
pub const PULL_RESISTANCE: f32 = 0.4;

/// Cap on the displayed pull distance
pub const MAX_PULL_DISTANCE: f32 = PULL_THRESHOLD * 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Pulling,
    Refreshing,
}

#[derive(Debug, Clone, Default)]
pub struct PullToRefresh {
    phase: RefreshPhase,
    start_y: f32,
    distance: f32,
}

impl PullToRefresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a touch; ignored unless the feed is at the top
    pub fn touch_start(&mut self, y: f32, at_top: bool) {
        if self.phase == RefreshPhase::Idle && at_top {
            self.phase = RefreshPhase::Pulling;
            self.start_y = y;
            self.distance = 0.0;
        }
    }

    /// Follow the touch, returning the displayed pull distance
    ///
    /// Scrolling away from the top abandons the pull.
    pub fn touch_move(&mut self, y: f32, at_top: bool) -> f32 {
        if self.phase != RefreshPhase::Pulling {
            return self.distance;
        }
        if !at_top {
            self.phase = RefreshPhase::Idle;
            self.distance = 0.0;
            return 0.0;
        }

        let drag = y - self.start_y;
        if drag > 0.0 {
            self.distance = (drag * PULL_RESISTANCE).min(MAX_PULL_DISTANCE);
        }
        self.distance
    }

    /// Release the touch
    ///
    /// Returns `true` when the pull passed the threshold and a refresh must
    /// start. The host calls [`PullToRefresh::finish`] once it is done.
    pub fn touch_end(&mut self) -> bool {
        if self.phase != RefreshPhase::Pulling {
            return false;
        }
        if self.distance >= PULL_THRESHOLD {
            self.phase = RefreshPhase::Refreshing;
            self.distance = PULL_THRESHOLD;
            true
        } else {
            self.phase = RefreshPhase::Idle;
            self.distance = 0.0;
            false
        }
    }

    /// The refresh completed, successfully or not
    pub fn finish(&mut self) {
        if self.phase == RefreshPhase::Refreshing {
            self.phase = RefreshPhase::Idle;
            self.distance = 0.0;
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        self.phase
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    /// Indicator progress from 0.0 to 1.0
    pub fn progress(&self) -> f32 {
        (self.distance / PULL_THRESHOLD).min(1.0)
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase == RefreshPhase::Refreshing
    }

    /// Scroll snapping is suspended while a pull is in progress
    pub fn snap_enabled(&self) -> bool {
        self.phase != RefreshPhase::Pulling
    }
}
