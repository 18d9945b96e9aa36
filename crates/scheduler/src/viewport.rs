//! Focus-relative prefetch planning
//!
//! Given the focused feed index, decides which neighbors to warm and at what
//! priority:
//! 1. Next item (`focus + 1`) - immediate
//! 2. Previous item (`focus - 1`) - near
//! 3. Next-next item (`focus + 2`) - far, issued after the debounce delay
//!
//! The focused item itself is loaded eagerly by its own media loader and is
//! never part of the plan.

use crate::priority::PrefetchPriority;

/// One neighbor the scheduler should warm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPrefetch {
    pub index: usize,
    pub priority: PrefetchPriority,
}

/// Priority calculator for neighbors of the focused item
///
/// # Example
///
/// ```
/// use panofeed_scheduler::{NeighborPlanner, PrefetchPriority};
///
/// let planner = NeighborPlanner::new(10);
/// let plan = planner.plan(5);
///
/// let indices: Vec<usize> = plan.iter().map(|p| p.index).collect();
/// assert_eq!(indices, vec![6, 4, 7]);
/// assert_eq!(plan[2].priority, PrefetchPriority::Far);
/// ```
#[derive(Debug, Clone)]
pub struct NeighborPlanner {
    item_count: usize,
}

impl NeighborPlanner {
    pub fn new(item_count: usize) -> Self {
        Self { item_count }
    }

    /// Update the number of items in the feed
    pub fn update_item_count(&mut self, item_count: usize) {
        self.item_count = item_count;
    }

    pub fn item_count(&self) -> usize {
        self.item_count
    }

    /// Calculate priority for a feed index relative to `focus`
    ///
    /// Returns `None` for the focused item, for items outside the prefetch
    /// neighborhood, and for indices past the end of the feed.
    pub fn priority_for(&self, focus: usize, index: usize) -> Option<PrefetchPriority> {
        if index >= self.item_count {
            return None;
        }
        if index == focus + 1 {
            Some(PrefetchPriority::Immediate)
        } else if focus > 0 && index == focus - 1 {
            Some(PrefetchPriority::Near)
        } else if index == focus + 2 {
            Some(PrefetchPriority::Far)
        } else {
            None
        }
    }

    /// Neighbors of `focus` in issue order, clipped to the feed bounds
    pub fn plan(&self, focus: usize) -> Vec<PlannedPrefetch> {
        let candidates = [
            Some(focus + 1),
            focus.checked_sub(1),
            Some(focus + 2),
        ];

        candidates
            .into_iter()
            .flatten()
            .filter_map(|index| {
                self.priority_for(focus, index)
                    .map(|priority| PlannedPrefetch { index, priority })
            })
            .collect()
    }
}
