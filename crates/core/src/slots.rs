//! Fixed-size storage for mounted items
//!
//! The mounted window never holds more than `2b + 1` consecutive indices, so
//! `index % (2b + 1)` gives every mounted item its own slot. Slots are
//! allocated once; a vacated slot keeps its value so the next index that
//! lands there can recycle it instead of allocating.

#[derive(Debug, Clone)]
struct Slot<T> {
    occupant: Option<usize>,
    value: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            occupant: None,
            value: None,
        }
    }
}

/// Slot arena keyed by feed index
#[derive(Debug, Clone)]
pub struct SlotArena<T> {
    slots: Vec<Slot<T>>,
}

impl<T> SlotArena<T> {
    /// Create an arena with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), Slot::default);
        Self { slots }
    }

    /// Arena sized for a window with `buffer_size` items each side of focus
    pub fn for_buffer(buffer_size: usize) -> Self {
        Self::new(2 * buffer_size + 1)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot that `index` maps to
    pub fn slot_of(&self, index: usize) -> usize {
        index % self.slots.len()
    }

    fn slot(&self, index: usize) -> Option<&Slot<T>> {
        let slot = &self.slots[self.slot_of(index)];
        (slot.occupant == Some(index)).then_some(slot)
    }

    /// Place `index` in its slot, building the value from whatever the slot
    /// held before
    ///
    /// `build` receives the previous value, vacated or not, for reuse.
    /// Returns the index that was displaced if the slot was still occupied;
    /// a well-formed window vacates before it occupies, so this is normally
    /// `None`.
    pub fn occupy<F>(&mut self, index: usize, build: F) -> Option<usize>
    where
        F: FnOnce(Option<T>) -> T,
    {
        let position = self.slot_of(index);
        let slot = &mut self.slots[position];
        let displaced = slot.occupant.replace(index);
        slot.value = Some(build(slot.value.take()));
        displaced
    }

    /// Release the slot held by `index`, keeping its value for reuse
    ///
    /// Returns `false` if `index` was not present.
    pub fn vacate(&mut self, index: usize) -> bool {
        let position = self.slot_of(index);
        let slot = &mut self.slots[position];
        if slot.occupant != Some(index) {
            return false;
        }
        slot.occupant = None;
        true
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slot(index)?.value.as_ref()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        let position = self.slot_of(index);
        let slot = &mut self.slots[position];
        if slot.occupant != Some(index) {
            return None;
        }
        slot.value.as_mut()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Occupied indices in ascending order
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.iter().map(|(index, _)| index).collect();
        indices.sort_unstable();
        indices
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .filter_map(|slot| Some((slot.occupant?, slot.value.as_ref()?)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .filter_map(|slot| Some((slot.occupant?, slot.value.as_mut()?)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
