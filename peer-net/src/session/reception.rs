//! The reception-side replay protection window.
//!
//! A sliding bitmask tracks which of the last `RECEPTION_WINDOW_SIZE`
//! counters relative to the highest one seen have already been accepted.
//! This lets reordered (but not replayed) messages through, which plain
//! UDP delivery requires.

use crate::constants::RECEPTION_WINDOW_SIZE;

#[derive(Debug)]
pub struct MessageReceptionState {
    /// The highest counter accepted so far. `None` until the first message.
    highest: Option<u32>,
    /// Bit `i` set means `highest - i` has been accepted.
    window: u32,
    /// Width of the window, in counters. Must not exceed 32.
    window_size: u32,
}

impl Default for MessageReceptionState {
    fn default() -> Self {
        MessageReceptionState::new()
    }
}

impl MessageReceptionState {
    pub fn new() -> Self {
        MessageReceptionState::with_window_size(RECEPTION_WINDOW_SIZE)
    }

    /// Build with a non-default window width (`PeerSetConfig::reception_window_size`).
    pub fn with_window_size(window_size: u32) -> Self {
        MessageReceptionState {
            highest: None,
            window: 0,
            window_size,
        }
    }

    /// The lowest counter value still inside the window, below which every
    /// counter is rejected outright. `None` until the first message has
    /// been accepted.
    pub fn window_floor(&self) -> Option<u32> {
        self.highest
            .map(|h| h.saturating_sub(self.window_size - 1))
    }

    /// Try to accept `counter`. Returns `true` if it is new (not previously
    /// seen and not below the window floor), advancing the window;
    /// returns `false` for a duplicate or a regression, without mutating
    /// state.
    pub fn accept(&mut self, counter: u32) -> bool {
        let highest = match self.highest {
            None => {
                self.highest = Some(counter);
                self.window = 1;
                return true;
            }
            Some(h) => h,
        };

        if counter > highest {
            let shift = counter - highest;
            self.window = if shift >= self.window_size {
                1
            } else {
                (self.window << shift) | 1
            };
            self.highest = Some(counter);
            true
        } else {
            let diff = highest - counter;
            if diff >= self.window_size {
                // Below the window floor: too old, reject unconditionally.
                false
            } else {
                let bit = 1u32 << diff;
                if self.window & bit != 0 {
                    // Duplicate.
                    false
                } else {
                    self.window |= bit;
                    true
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_is_always_accepted() {
        let mut state = MessageReceptionState::new();
        assert!(state.accept(100));
    }

    #[test]
    fn strictly_increasing_counters_are_all_accepted() {
        let mut state = MessageReceptionState::new();
        for counter in 1..50 {
            assert!(state.accept(counter));
        }
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut state = MessageReceptionState::new();
        assert!(state.accept(10));
        assert!(!state.accept(10));
    }

    #[test]
    fn reordered_but_in_window_messages_are_accepted_once() {
        let mut state = MessageReceptionState::new();
        assert!(state.accept(10));
        assert!(state.accept(12));
        assert!(state.accept(11));
        assert!(!state.accept(11));
        assert!(!state.accept(12));
    }

    #[test]
    fn counters_below_the_window_floor_are_rejected() {
        let mut state = MessageReceptionState::new();
        assert!(state.accept(1000));
        let floor = state.window_floor().unwrap();
        assert!(!state.accept(floor.saturating_sub(1)));
    }

}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        /// No counter is ever accepted twice, for any order of arrival
        /// (§8 property 1).
        #[test]
        fn never_accepts_the_same_counter_twice(sequence in proptest::collection::vec(0u32..2000, 1..200)) {
            crate::testing::init();
            let mut state = MessageReceptionState::new();
            let mut accepted = HashSet::new();
            for counter in sequence {
                if state.accept(counter) {
                    prop_assert!(accepted.insert(counter), "counter {} accepted twice", counter);
                }
            }
        }

        /// A strictly increasing sequence is always accepted in full,
        /// regardless of how far apart consecutive counters are (§8
        /// property 2).
        #[test]
        fn strictly_increasing_sequences_are_always_accepted(steps in proptest::collection::vec(1u32..500, 1..100)) {
            crate::testing::init();
            let mut state = MessageReceptionState::new();
            let mut counter = 0u32;
            for step in steps {
                counter += step;
                prop_assert!(state.accept(counter));
            }
        }

        /// Nothing below the current window floor is ever accepted, no
        /// matter how it got there (§8 property 3).
        #[test]
        fn nothing_below_the_window_floor_is_ever_accepted(
            highest in (RECEPTION_WINDOW_SIZE * 4)..1_000_000u32,
            below in 1u32..(RECEPTION_WINDOW_SIZE * 4),
        ) {
            crate::testing::init();
            let mut state = MessageReceptionState::new();
            prop_assert!(state.accept(highest));
            let floor = state.window_floor().unwrap();
            let candidate = highest.saturating_sub(below + RECEPTION_WINDOW_SIZE);
            if candidate < floor {
                prop_assert!(!state.accept(candidate));
            }
        }
    }
}
