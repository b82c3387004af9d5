//! Time-axis ring buffer
//!
//! The network remembers a bounded number of past iterations. The buffer
//! advances in two flavours: a shallow step leaves the re-used slot with
//! stale content (the caller overwrites it anyway), a clean step zero-fills
//! it (the caller accumulates into it). Reads address slots by their
//! distance into the past; distance zero is the current slot.

/// In-place zeroing of a buffer element
pub trait ZeroFill {
    /// Overwrite the element with zeroes without reallocating
    fn zero_fill(&mut self);
}

impl ZeroFill for f64 {
    fn zero_fill(&mut self) {
        *self = 0.0;
    }
}

impl ZeroFill for Vec<f64> {
    fn zero_fill(&mut self) {
        self.fill(0.0);
    }
}

impl ZeroFill for Vec<Vec<f64>> {
    fn zero_fill(&mut self) {
        for inner in self.iter_mut() {
            inner.fill(0.0);
        }
    }
}

/// Fixed-size ring buffer over a common time axis
#[derive(Debug, Clone)]
pub struct DataRingbuffer<T> {
    slots: Vec<T>,
    current: usize,
}

impl<T: ZeroFill> DataRingbuffer<T> {
    /// Allocate `slot_count` slots through the given element factory
    pub fn new(slot_count: usize, mut element: impl FnMut() -> T) -> Self {
        debug_assert!(0 < slot_count);
        Self {
            slots: (0..slot_count).map(|_| element()).collect(),
            current: 0,
        }
    }

    /// Number of time steps the buffer can hold
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Advance the time axis; the new current slot keeps its stale content
    pub fn shallow_step(&mut self) {
        self.current = (self.current + self.slots.len() - 1) % self.slots.len();
    }

    /// Advance the time axis and zero-fill the new current slot
    pub fn clean_step(&mut self) {
        self.shallow_step();
        self.slots[self.current].zero_fill();
    }

    /// Zero-fill every slot
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.zero_fill();
        }
    }

    /// Read a slot `past_index` steps into the past; `None` once the
    /// distance leaves the remembered window
    pub fn get(&self, past_index: usize) -> Option<&T> {
        if past_index < self.slots.len() {
            Some(&self.slots[(self.current + past_index) % self.slots.len()])
        } else {
            None
        }
    }

    /// Mutable access to a slot `past_index` steps into the past
    pub fn get_mut(&mut self, past_index: usize) -> Option<&mut T> {
        let len = self.slots.len();
        if past_index < len {
            Some(&mut self.slots[(self.current + past_index) % len])
        } else {
            None
        }
    }

    /// The current slot
    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    /// Mutable access to the current slot
    pub fn current_mut(&mut self) -> &mut T {
        &mut self.slots[self.current]
    }

    /// Split the buffer into the mutable current slot and a shared view of
    /// the past slots, enabling simultaneous write-current/read-past access
    pub fn split_current_mut(&mut self) -> (&mut T, RingPast<'_, T>) {
        let current = self.current;
        let len = self.slots.len();
        let (before, rest) = self.slots.split_at_mut(current);
        let (current_slot, after) = rest
            .split_first_mut()
            .expect("ring buffers always hold at least one slot");
        (
            current_slot,
            RingPast {
                before,
                after,
                current,
                len,
            },
        )
    }
}

/// Shared view over the non-current slots of a [`DataRingbuffer`]
#[derive(Debug)]
pub struct RingPast<'a, T> {
    before: &'a [T],
    after: &'a [T],
    current: usize,
    len: usize,
}

impl<T> Clone for RingPast<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RingPast<'_, T> {}

impl<'a, T> RingPast<'a, T> {
    /// Read a slot `past_index` steps into the past; the current slot
    /// (`past_index == 0`) is excluded from this view
    pub fn get(&self, past_index: usize) -> Option<&'a T> {
        if past_index == 0 || past_index >= self.len {
            return None;
        }
        let index = (self.current + past_index) % self.len;
        if index < self.current {
            Some(&self.before[index])
        } else {
            Some(&self.after[index - self.current - 1])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_shallow_step_keeps_content() {
        let mut ring: DataRingbuffer<Vec<f64>> = DataRingbuffer::new(3, || vec![0.0; 2]);
        ring.current_mut()[0] = 1.0;
        ring.shallow_step();
        ring.current_mut()[0] = 2.0;
        ring.shallow_step();
        ring.current_mut()[0] = 3.0;

        assert_eq!(ring.get(0).unwrap()[0], 3.0);
        assert_eq!(ring.get(1).unwrap()[0], 2.0);
        assert_eq!(ring.get(2).unwrap()[0], 1.0);
        assert!(ring.get(3).is_none());
    }

    #[test]
    fn test_clean_step_zero_fills_reused_slot() {
        let mut ring: DataRingbuffer<Vec<f64>> = DataRingbuffer::new(2, || vec![0.0; 1]);
        ring.current_mut()[0] = 7.0;
        ring.clean_step();
        assert_eq!(ring.current()[0], 0.0);
        assert_eq!(ring.get(1).unwrap()[0], 7.0);
        // wrapping around reclaims the oldest slot
        ring.clean_step();
        assert_eq!(ring.current()[0], 0.0);
    }

    #[test]
    fn test_split_current_mut_sees_consistent_past() {
        let mut ring: DataRingbuffer<Vec<f64>> = DataRingbuffer::new(3, || vec![0.0; 1]);
        for value in [1.0, 2.0, 3.0] {
            ring.shallow_step();
            ring.current_mut()[0] = value;
        }
        let (current, past) = ring.split_current_mut();
        current[0] = 9.0;
        assert_eq!(past.get(1).unwrap()[0], 2.0);
        assert_eq!(past.get(2).unwrap()[0], 1.0);
        assert!(past.get(0).is_none());
        assert!(past.get(3).is_none());
    }

    proptest! {
        #[test]
        fn prop_past_reads_match_write_history(
            slot_count in 1usize..8,
            steps in 0usize..32,
        ) {
            let mut ring: DataRingbuffer<Vec<f64>> =
                DataRingbuffer::new(slot_count, || vec![0.0; 1]);
            for step in 0..steps {
                ring.shallow_step();
                ring.current_mut()[0] = step as f64;
            }
            for past in 0..slot_count.min(steps) {
                let expected = (steps - 1 - past) as f64;
                prop_assert_eq!(ring.get(past).unwrap()[0], expected);
            }
            prop_assert!(ring.get(slot_count).is_none());
        }
    }
}
