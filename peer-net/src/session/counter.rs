//! The per-session monotonic send counter.

use crate::constants::COUNTER_ROLLOVER_THRESHOLD;

/// A strictly-increasing 32-bit send counter. The session must never reuse
/// a counter value, so once the counter reaches the rollover threshold the
/// session is expected to initiate closure before the next send.
#[derive(Debug)]
pub struct MessageCounter {
    next: u32,
}

impl MessageCounter {
    pub fn new() -> Self {
        MessageCounter { next: 1 }
    }

    #[cfg(test)]
    pub fn starting_at(next: u32) -> Self {
        MessageCounter { next }
    }

    /// Increment and return the counter value for the send that is about
    /// to happen. Callers must check `is_at_rollover_threshold` *before*
    /// calling this for the send that would exhaust the counter: this
    /// method does not refuse to hand out the terminal value, it only
    /// reports it so the caller can close first.
    pub fn get_incremented_counter(&mut self) -> u32 {
        let value = self.next;
        self.next = self.next.wrapping_add(1);
        value
    }

    /// True once the counter has handed out its last usable value and any
    /// further send would require a new session.
    pub fn is_at_rollover_threshold(&self) -> bool {
        self.next >= COUNTER_ROLLOVER_THRESHOLD
    }
}

impl Default for MessageCounter {
    fn default() -> Self {
        MessageCounter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_strictly_increases() {
        let mut counter = MessageCounter::new();
        let a = counter.get_incremented_counter();
        let b = counter.get_incremented_counter();
        assert!(a < b);
    }

    #[test]
    fn rollover_threshold_is_detected_before_wrap() {
        let counter = MessageCounter::starting_at(COUNTER_ROLLOVER_THRESHOLD);
        assert!(counter.is_at_rollover_threshold());
    }

    #[test]
    fn rollover_threshold_is_not_yet_reached_for_ordinary_values() {
        let counter = MessageCounter::starting_at(5);
        assert!(!counter.is_at_rollover_threshold());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The counter never hands out the same value twice across any
        /// run of increments, wherever it started (§8 property 1).
        #[test]
        fn never_repeats_a_value_within_one_session(start in 1u32..(COUNTER_ROLLOVER_THRESHOLD - 200), extra_sends in 0u32..150) {
            crate::testing::init();
            let mut counter = MessageCounter::starting_at(start);
            let mut seen = std::collections::HashSet::new();
            for _ in 0..=extra_sends {
                let value = counter.get_incremented_counter();
                prop_assert!(seen.insert(value), "counter value {} handed out twice", value);
            }
        }

        /// Rollover is reported before, never after, the counter would
        /// wrap back to a previously issued value (§8 property 3).
        #[test]
        fn rollover_is_flagged_before_the_terminal_value_is_handed_out(start in (COUNTER_ROLLOVER_THRESHOLD - 50)..COUNTER_ROLLOVER_THRESHOLD) {
            crate::testing::init();
            let counter = MessageCounter::starting_at(start);
            prop_assert!(counter.is_at_rollover_threshold());
        }
    }
}
