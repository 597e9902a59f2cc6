use serde::{Deserialize, Serialize};

/// Collection of unique indices supporting add, remove, and contains operations.
/// Uses packed bitfields where each bit represents one index's containment state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSet {
    /// Packed bitfields representing index containment.
    flags: Vec<u64>,
}

impl IndexSet {
    const SHIFT: usize = 6;
    const MASK: usize = 63;

    /// Gets the bundle capacity needed for the given count.
    #[inline(always)]
    pub fn get_bundle_capacity(count: usize) -> usize {
        (count + Self::MASK) >> Self::SHIFT
    }

    /// Creates a new IndexSet able to hold indices below `initial_capacity` without resizing.
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            flags: vec![0; Self::get_bundle_capacity(initial_capacity)],
        }
    }

    /// Checks if an index is contained in the set.
    #[inline(always)]
    pub fn contains(&self, index: usize) -> bool {
        let bundle_index = index >> Self::SHIFT;
        bundle_index < self.flags.len()
            && (self.flags[bundle_index] & (1u64 << (index & Self::MASK))) != 0
    }

    /// Gets whether none of the given indices are contained in the set.
    #[inline(always)]
    pub fn can_fit(&self, index_list: &[usize]) -> bool {
        index_list.iter().all(|&index| !self.contains(index))
    }

    /// Adds an index to the set, growing the bitfield if required.
    /// Returns false if the index was already present.
    #[inline(always)]
    pub fn add(&mut self, index: usize) -> bool {
        let bundle_index = index >> Self::SHIFT;
        if bundle_index >= self.flags.len() {
            // Round up to power of 2
            let new_capacity = (bundle_index + 1).next_power_of_two();
            self.flags.resize(new_capacity, 0);
        }
        let slot = 1u64 << (index & Self::MASK);
        let was_present = self.flags[bundle_index] & slot != 0;
        self.flags[bundle_index] |= slot;
        !was_present
    }

    /// Removes an index from the set. Returns false if the index was not present.
    #[inline(always)]
    pub fn remove(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.flags[index >> Self::SHIFT] &= !(1u64 << (index & Self::MASK));
        true
    }

    /// Clears all indices from the set without releasing capacity.
    #[inline(always)]
    pub fn clear(&mut self) {
        self.flags.iter_mut().for_each(|bundle| *bundle = 0);
    }

    /// Counts the number of indices contained in the set.
    pub fn count(&self) -> usize {
        self.flags
            .iter()
            .map(|bundle| bundle.count_ones() as usize)
            .sum()
    }

    /// Ensures the set can hold indices below `index_capacity` without resizing.
    pub fn ensure_capacity(&mut self, index_capacity: usize) {
        let bundle_capacity = Self::get_bundle_capacity(index_capacity);
        if self.flags.len() < bundle_capacity {
            self.flags.resize(bundle_capacity, 0);
        }
    }
}
