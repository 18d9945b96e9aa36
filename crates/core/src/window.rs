//! Viewport windowing
//!
//! Maps the scroll offset to a focused index and keeps a small window of
//! items mounted around it. Every item occupies exactly one viewport height,
//! so positions are a pure function of the index:
//!
//! - item offset: `index * viewport_height`
//! - container height: `item_count * viewport_height`
//! - mounted window: `[focus - b, focus + b] ∩ [0, item_count)`
//!
//! Scroll events are coalesced per animation frame; the window is
//! recomputed at most once per frame using the latest offset.

use panofeed_scheduler::FrameThrottle;
use std::ops::Range;

/// Focused index for a scroll offset
///
/// Rounds half up, so an offset exactly halfway between two items focuses
/// the later one. The result is clamped to the feed; an empty feed or a
/// degenerate viewport yields `0`.
pub fn focus_for_offset(offset: f32, viewport_height: f32, item_count: usize) -> usize {
    if item_count == 0 || !(viewport_height > 0.0) || !offset.is_finite() {
        return 0;
    }
    let position = (offset / viewport_height + 0.5).floor();
    if position <= 0.0 {
        return 0;
    }
    (position as usize).min(item_count - 1)
}

/// Indices mounted around `focus`
pub fn mount_range(focus: usize, buffer_size: usize, item_count: usize) -> Range<usize> {
    if item_count == 0 {
        return 0..0;
    }
    let focus = focus.min(item_count - 1);
    let start = focus.saturating_sub(buffer_size);
    let end = focus.saturating_add(buffer_size).saturating_add(1).min(item_count);
    start..end
}

/// Where a mounted item is drawn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub index: usize,

    /// Vertical translate from the top of the scroll container, in pixels
    pub offset: f32,

    pub height: f32,
}

/// Focus and mounted indices at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WindowState {
    pub focus_index: usize,

    /// Mounted indices in ascending order
    pub mounted: Vec<usize>,
}

/// Difference produced by a recompute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowChange {
    pub previous_focus: usize,
    pub focus: usize,

    /// Indices that entered the window, ascending
    pub mounted: Vec<usize>,

    /// Indices that left the window, ascending
    pub unmounted: Vec<usize>,
}

impl WindowChange {
    pub fn focus_changed(&self) -> bool {
        self.previous_focus != self.focus
    }
}

/// Scroll-driven window controller
///
/// # Example
///
/// ```
/// use panofeed_core::WindowController;
///
/// let mut window = WindowController::new(800.0, 10, 1);
/// assert_eq!(window.mounted(), &[0, 1]);
///
/// if window.on_scroll(4000.0) {
///     // host requests an animation frame, then:
///     let change = window.on_animation_frame().unwrap();
///     assert_eq!(change.focus, 5);
/// }
/// assert_eq!(window.mounted(), &[4, 5, 6]);
/// assert_eq!(window.item_offset(5), 4000.0);
/// ```
#[derive(Debug, Clone)]
pub struct WindowController {
    viewport_height: f32,
    item_count: usize,
    buffer_size: usize,
    scroll_offset: f32,
    state: WindowState,
    throttle: FrameThrottle,
}

impl WindowController {
    /// Create a controller focused on the first item
    pub fn new(viewport_height: f32, item_count: usize, buffer_size: usize) -> Self {
        Self::with_initial_index(viewport_height, item_count, buffer_size, 0)
    }

    /// Create a controller restored to `initial_index`
    ///
    /// The scroll offset starts at `initial_index * viewport_height`; an
    /// out-of-range index is clamped.
    pub fn with_initial_index(
        viewport_height: f32,
        item_count: usize,
        buffer_size: usize,
        initial_index: usize,
    ) -> Self {
        let mut controller = Self {
            viewport_height,
            item_count,
            buffer_size,
            scroll_offset: 0.0,
            state: WindowState::default(),
            throttle: FrameThrottle::new(),
        };
        let focus = initial_index.min(item_count.saturating_sub(1));
        controller.scroll_offset = controller.item_offset(focus);
        controller.recompute();
        controller
    }

    /// Record a scroll event
    ///
    /// Returns `true` when the host should request an animation frame and
    /// call [`WindowController::on_animation_frame`] from it.
    pub fn on_scroll(&mut self, offset: f32) -> bool {
        self.throttle.push(offset)
    }

    /// Apply the latest coalesced scroll offset
    pub fn on_animation_frame(&mut self) -> Option<WindowChange> {
        let offset = self.throttle.take()?;
        self.scroll_offset = offset;
        self.recompute()
    }

    /// Jump directly to an index, bypassing frame coalescing
    pub fn scroll_to_index(&mut self, index: usize) -> Option<WindowChange> {
        let index = index.min(self.item_count.saturating_sub(1));
        self.scroll_offset = self.item_offset(index);
        self.recompute()
    }

    /// Re-derive focus and window from the current inputs
    ///
    /// Returns `None` when neither focus nor the mounted set changed, so
    /// repeated recomputes with the same input cause no churn.
    pub fn recompute(&mut self) -> Option<WindowChange> {
        let focus = focus_for_offset(self.scroll_offset, self.viewport_height, self.item_count);
        let mounted: Vec<usize> = mount_range(focus, self.buffer_size, self.item_count).collect();

        if focus == self.state.focus_index && mounted == self.state.mounted {
            return None;
        }

        let entered = mounted
            .iter()
            .copied()
            .filter(|index| !self.state.mounted.contains(index))
            .collect();
        let left = self
            .state
            .mounted
            .iter()
            .copied()
            .filter(|index| !mounted.contains(index))
            .collect();

        let change = WindowChange {
            previous_focus: self.state.focus_index,
            focus,
            mounted: entered,
            unmounted: left,
        };
        self.state = WindowState {
            focus_index: focus,
            mounted,
        };
        Some(change)
    }

    /// Update the viewport height and reposition
    pub fn set_viewport_height(&mut self, viewport_height: f32) -> Option<WindowChange> {
        self.viewport_height = viewport_height;
        self.recompute()
    }

    /// Update the item count, clamping focus into the new feed
    pub fn set_item_count(&mut self, item_count: usize) -> Option<WindowChange> {
        self.item_count = item_count;
        let last_offset = self.item_offset(item_count.saturating_sub(1));
        if self.scroll_offset > last_offset {
            self.scroll_offset = last_offset;
        }
        self.recompute()
    }

    /// Absolute vertical offset of an item
    pub fn item_offset(&self, index: usize) -> f32 {
        index as f32 * self.viewport_height
    }

    /// Total scrollable height
    pub fn container_height(&self) -> f32 {
        self.item_count as f32 * self.viewport_height
    }

    /// Snap points for the mounted items
    pub fn snap_points(&self) -> Vec<f32> {
        self.state
            .mounted
            .iter()
            .map(|&index| self.item_offset(index))
            .collect()
    }

    pub fn placements(&self) -> Vec<Placement> {
        self.state
            .mounted
            .iter()
            .map(|&index| Placement {
                index,
                offset: self.item_offset(index),
                height: self.viewport_height,
            })
            .collect()
    }

    /// Scroll offset that shows the current focus, for restoring position
    pub fn initial_scroll_offset(&self) -> f32 {
        self.item_offset(self.state.focus_index)
    }

    pub fn focus(&self) -> usize {
        self.state.focus_index
    }

    pub fn mounted(&self) -> &[usize] {
        &self.state.mounted
    }

    pub fn is_mounted(&self, index: usize) -> bool {
        self.state.mounted.contains(&index)
    }

    pub fn state(&self) -> &WindowState {
        &self.state
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn viewport_height(&self) -> f32 {
        self.viewport_height
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Upper bound on mounted items
    pub fn max_mounted(&self) -> usize {
        2 * self.buffer_size + 1
    }

    /// Whether an animation frame has been requested and not yet run
    pub fn frame_pending(&self) -> bool {
        self.throttle.is_ticking()
    }

    /// Scroll events received and frames that recomputed
    pub fn frame_stats(&self) -> (u64, u64) {
        (self.throttle.event_count(), self.throttle.frame_count())
    }
}
