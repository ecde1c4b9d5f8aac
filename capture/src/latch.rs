//! Write-once timestamp storage shared between interrupt and task context.
//!
//! # Design
//! Each [Latch] holds a state word and a timestamp. The producer claims an empty latch with a
//! compare-exchange, stores the timestamp and publishes it by moving the state to `SET`. Once set,
//! further writes are rejected until the consumer clears the latch again.
//!
//! Clearing only ever moves the state back to `EMPTY`. A producer that was interrupted between
//! claiming and publishing (only possible with a truly parallel consumer) will fail to publish
//! and the edge is dropped, so a cleared latch can never observe a half-written timestamp.
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use super::MAX_CHANNELS;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const SET: u8 = 2;

/// A single channel arrival timestamp, written at most once between clears.
#[derive(Debug)]
pub struct Latch {
    state: AtomicU8,
    value: AtomicU32,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: AtomicU32::new(0),
        }
    }

    /// Latch a timestamp.
    ///
    /// # Returns
    /// True if the timestamp was stored. False if the latch already holds a timestamp.
    pub fn set(&self, timestamp: u32) -> bool {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.value.store(timestamp, Ordering::Relaxed);

        self.state
            .compare_exchange(WRITING, SET, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Get the latched timestamp, if any.
    pub fn get(&self) -> Option<u32> {
        (self.state.load(Ordering::Acquire) == SET)
            .then(|| self.value.load(Ordering::Relaxed))
    }

    pub fn is_set(&self) -> bool {
        self.state.load(Ordering::Acquire) == SET
    }

    /// Release a set latch.
    ///
    /// # Returns
    /// The timestamp that was held, if the latch was set.
    pub fn take(&self) -> Option<u32> {
        let value = self.value.load(Ordering::Relaxed);
        self.state
            .compare_exchange(SET, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
            .then_some(value)
    }

    /// Unconditionally empty the latch.
    pub fn clear(&self) {
        self.state.store(EMPTY, Ordering::Release);
    }
}

/// Latch storage for all channels.
#[derive(Debug, Default)]
pub struct Latches([Latch; MAX_CHANNELS]);

impl Latches {
    pub const fn new() -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const LATCH: Latch = Latch::new();
        Self([LATCH; MAX_CHANNELS])
    }

    /// Get the latch of a channel.
    ///
    /// # Panics
    /// If `channel` is not below [MAX_CHANNELS].
    pub fn channel(&self, channel: usize) -> &Latch {
        &self.0[channel]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Latch> {
        self.0.iter()
    }

    /// Empty all latches.
    pub fn clear(&self) {
        for latch in self.0.iter() {
            latch.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_wins() {
        let latch = Latch::new();
        assert_eq!(latch.get(), None);
        assert!(latch.set(10));
        assert!(!latch.set(20));
        assert_eq!(latch.get(), Some(10));
    }

    #[test]
    fn take_releases() {
        let latch = Latch::new();
        assert_eq!(latch.take(), None);
        latch.set(7);
        assert_eq!(latch.take(), Some(7));
        assert!(!latch.is_set());
        assert!(latch.set(8));
        assert_eq!(latch.get(), Some(8));
    }

    #[test]
    fn clear_all() {
        let latches = Latches::new();
        latches.channel(0).set(1);
        latches.channel(7).set(2);
        latches.clear();
        assert!(latches.iter().all(|latch| !latch.is_set()));
        latches.clear();
        assert!(latches.iter().all(|latch| latch.get().is_none()));
    }
}
