use super::ChannelMask;

/// The consumer side of a capture engine.
///
/// # Note
/// Timestamps are engine specific counter values (microseconds or sample ticks). Every method
/// taking `now` expects a reading of that same counter.
pub trait Capture {
    /// The number of active channels.
    fn channels(&self) -> usize;

    /// The arrival timestamp of a channel if it has reported in the current cycle.
    fn timestamp(&self, channel: usize) -> Option<u32>;

    /// Process any pending producer output.
    fn drain(&mut self) {}

    /// Un-report every channel whose timestamp is older than the staleness window.
    ///
    /// # Returns
    /// The channels that were cleared.
    fn expire(&mut self, now: u32) -> ChannelMask;

    /// Discard all per-channel state. Calling this repeatedly has no further effect.
    fn reset(&mut self);

    /// The set of channels that have reported.
    fn reported(&self) -> ChannelMask {
        (0..self.channels())
            .filter(|&channel| self.timestamp(channel).is_some())
            .fold(0, |mask, channel| mask | (1 << channel))
    }
}

/// Elapsed counter ticks from `timestamp` to `now`.
///
/// Timestamps up to `i32::MAX` ticks ahead of `now` count as not yet elapsed. This happens when a
/// producer latches a channel after the consumer has sampled `now`.
pub fn age(now: u32, timestamp: u32) -> u32 {
    (now.wrapping_sub(timestamp) as i32).max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_wraps() {
        assert_eq!(age(1500, 1000), 500);
        assert_eq!(age(10, u32::MAX - 9), 20);
        assert_eq!(age(1000, 1001), 0);
    }
}
