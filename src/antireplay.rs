use std::sync::atomic::{AtomicU64, Ordering};

use crate::proto::{MAX_COUNTER_SKIP_AHEAD, REPLAY_WINDOW_SIZE};

/// Sliding window over the most recent `REPLAY_WINDOW_SIZE` receive counters.
///
/// Each slot remembers the highest counter that hashed into it; a counter is
/// valid only if it is strictly newer than its slot and does not skip ahead
/// farther than `MAX_COUNTER_SKIP_AHEAD`.
pub(crate) struct ReplayFilter([AtomicU64; REPLAY_WINDOW_SIZE]);

impl ReplayFilter {
    pub fn new() -> Self {
        Self(std::array::from_fn(|_| AtomicU64::new(0)))
    }

    /// Check the window without mutating state.
    pub fn check(&self, counter: u32) -> bool {
        let slot = &self.0[(counter as usize) % self.0.len()];
        let counter = u64::from(counter) + 1;
        let prev_counter = slot.load(Ordering::Relaxed);
        prev_counter < counter && counter - prev_counter <= MAX_COUNTER_SKIP_AHEAD
    }

    /// Update the window, returning true if the counter is still valid.
    /// This should only be called after the message is authenticated.
    pub fn update(&self, counter: u32) -> bool {
        let slot = &self.0[(counter as usize) % self.0.len()];
        let counter = u64::from(counter) + 1;
        let prev_counter = slot.fetch_max(counter, Ordering::Relaxed);
        prev_counter < counter && counter - prev_counter <= MAX_COUNTER_SKIP_AHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_counters_in_order() {
        let filter = ReplayFilter::new();
        for counter in 4..256 {
            assert!(filter.check(counter));
            assert!(filter.update(counter));
        }
    }

    #[test]
    fn rejects_duplicates() {
        let filter = ReplayFilter::new();
        assert!(filter.update(17));
        assert!(!filter.check(17));
        assert!(!filter.update(17));
    }

    #[test]
    fn accepts_slightly_out_of_order() {
        let filter = ReplayFilter::new();
        for counter in [8, 6, 9, 5, 7] {
            assert!(filter.update(counter), "counter {counter} rejected");
        }
    }

    #[test]
    fn rejects_counters_behind_the_window() {
        let filter = ReplayFilter::new();
        for counter in 0..(REPLAY_WINDOW_SIZE as u32 * 2) {
            filter.update(counter);
        }
        // Slot for counter 3 now remembers 3 + window size.
        assert!(!filter.check(3));
        assert!(!filter.update(3));
    }

    #[test]
    fn rejects_excessive_skip_ahead() {
        let filter = ReplayFilter::new();
        assert!(filter.update(4));
        let far = 4 + MAX_COUNTER_SKIP_AHEAD as u32 + REPLAY_WINDOW_SIZE as u32;
        assert!(!filter.check(far));
    }
}
