//! Slot storage for registered waiters.
//!
//! Reuses freed slots so that waiters which come and go (dropped futures,
//! dropped registrations) do not grow the backing vector without bound.

#[derive(Debug)]
pub(crate) struct WaiterSlab<T> {
    entries: Vec<Option<T>>,
    free_slots: Vec<usize>,
    active: usize,
}

impl<T> WaiterSlab<T> {
    pub(crate) const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_slots: Vec::new(),
            active: 0,
        }
    }

    /// Inserts an entry, reusing a free slot if available.
    pub(crate) fn insert(&mut self, value: T) -> usize {
        self.active += 1;
        if let Some(index) = self.free_slots.pop() {
            self.entries[index] = Some(value);
            index
        } else {
            self.entries.push(Some(value));
            self.entries.len() - 1
        }
    }

    /// Replaces the value in an occupied slot. Returns false if the slot is empty.
    pub(crate) fn replace(&mut self, index: usize, value: T) -> bool {
        match self.entries.get_mut(index) {
            Some(slot) if slot.is_some() => {
                *slot = Some(value);
                true
            }
            _ => false,
        }
    }

    /// Removes an entry by index, returning its slot to the free list.
    ///
    /// Removing an index that is empty or out of range is a no-op.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let value = self.entries.get_mut(index)?.take()?;
        self.active -= 1;
        self.free_slots.push(index);

        while matches!(self.entries.last(), Some(None)) {
            let tail = self.entries.len() - 1;
            self.entries.pop();
            if let Some(pos) = self.free_slots.iter().position(|&i| i == tail) {
                self.free_slots.swap_remove(pos);
            }
        }
        Some(value)
    }

    /// Takes every entry, leaving the slab empty.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.free_slots.clear();
        self.active = 0;
        std::mem::take(&mut self.entries)
            .into_iter()
            .flatten()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.active
    }
}

impl<T> Default for WaiterSlab<T> {
    fn default() -> Self {
        Self::new()
    }
}
