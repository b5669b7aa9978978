#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Dual-threshold debouncing that keeps overlays from flickering.
//!
//! A [`Hysteresis`] counts consecutive frames in the same direction. It turns
//! on after `on_frames` consecutive `true` observations and off after
//! `off_frames` consecutive `false` observations; anything shorter leaves the
//! output untouched.

use std::collections::HashMap;

/// Default number of consecutive `true` frames required to turn on.
pub const DEFAULT_ON_FRAMES: u32 = 3;
/// Default number of consecutive `false` frames required to turn off.
pub const DEFAULT_OFF_FRAMES: u32 = 6;

/// Debounced boolean driven once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hysteresis {
    counter: i32,
    on_frames: u32,
    off_frames: u32,
    on: bool,
}

impl Hysteresis {
    /// Creates a controller that starts off.
    ///
    /// Frame counts of zero are raised to one.
    #[must_use]
    pub fn new(on_frames: u32, off_frames: u32) -> Self {
        Self {
            counter: 0,
            on_frames: on_frames.clamp(1, i32::MAX as u32),
            off_frames: off_frames.clamp(1, i32::MAX as u32),
            on: false,
        }
    }

    /// Feeds this frame's raw condition and returns the debounced state.
    ///
    /// The counter moves toward `+on_frames` on `true` and toward
    /// `-off_frames` on `false`, restarting from zero whenever the direction
    /// changes. The output switches only when a bound is reached.
    pub fn update(&mut self, condition: bool) -> bool {
        let on_bound = self.on_frames as i32;
        let off_bound = -(self.off_frames as i32);

        if condition {
            self.counter = (self.counter.max(0) + 1).min(on_bound);
            if self.counter >= on_bound {
                self.on = true;
            }
        } else {
            self.counter = (self.counter.min(0) - 1).max(off_bound);
            if self.counter <= off_bound {
                self.on = false;
            }
        }

        self.on
    }

    /// Debounced state after the most recent update.
    #[must_use]
    pub const fn is_on(&self) -> bool {
        self.on
    }

    /// Current counter within `-off_frames..=on_frames`.
    #[must_use]
    pub const fn counter(&self) -> i32 {
        self.counter
    }

    /// Returns the controller to its initial off state.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.on = false;
    }
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self::new(DEFAULT_ON_FRAMES, DEFAULT_OFF_FRAMES)
    }
}

/// Independent [`Hysteresis`] states keyed by string identifier.
#[derive(Clone, Debug)]
pub struct HysteresisManager {
    on_frames: u32,
    off_frames: u32,
    states: HashMap<String, Hysteresis>,
}

impl HysteresisManager {
    /// Creates a manager whose lazily created states use the provided counts.
    #[must_use]
    pub fn new(on_frames: u32, off_frames: u32) -> Self {
        Self {
            on_frames,
            off_frames,
            states: HashMap::new(),
        }
    }

    /// Feeds a condition to the state for `key`, creating it on first use.
    pub fn update(&mut self, key: &str, condition: bool) -> bool {
        let (on_frames, off_frames) = (self.on_frames, self.off_frames);
        self.update_with(key, condition, on_frames, off_frames)
    }

    /// Like [`HysteresisManager::update`], but a newly created state uses the
    /// provided counts instead of the manager defaults.
    pub fn update_with(
        &mut self,
        key: &str,
        condition: bool,
        on_frames: u32,
        off_frames: u32,
    ) -> bool {
        if let Some(state) = self.states.get_mut(key) {
            return state.update(condition);
        }
        let mut state = Hysteresis::new(on_frames, off_frames);
        let on = state.update(condition);
        let _ = self.states.insert(key.to_owned(), state);
        on
    }

    /// Debounced state of `key`; unknown keys are off.
    #[must_use]
    pub fn is_on(&self, key: &str) -> bool {
        self.states.get(key).is_some_and(Hysteresis::is_on)
    }

    /// Resets the state of `key` to off, keeping its frame counts.
    pub fn reset(&mut self, key: &str) {
        if let Some(state) = self.states.get_mut(key) {
            state.reset();
        }
    }

    /// Forgets the state of `key`.
    pub fn remove(&mut self, key: &str) {
        let _ = self.states.remove(key);
    }

    /// Forgets every state whose key fails the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.states.retain(|key, _| keep(key));
    }

    /// Forgets every state.
    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Reports whether no key is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for HysteresisManager {
    fn default() -> Self {
        Self::new(DEFAULT_ON_FRAMES, DEFAULT_OFF_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_stays_within_bounds() {
        let mut hysteresis = Hysteresis::new(2, 3);
        for _ in 0..10 {
            let _ = hysteresis.update(true);
        }
        assert_eq!(hysteresis.counter(), 2);
        for _ in 0..10 {
            let _ = hysteresis.update(false);
        }
        assert_eq!(hysteresis.counter(), -3);
    }

    #[test]
    fn zero_frame_counts_are_raised() {
        let mut hysteresis = Hysteresis::new(0, 0);
        assert!(hysteresis.update(true));
        assert!(!hysteresis.update(false));
    }
}
