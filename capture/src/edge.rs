//! Edge capture engine
//!
//! # Design
//! Each channel line raises an interrupt on its rising edge. The interrupt handler reads a
//! free-running microsecond counter and hands it to the [EdgeRecorder], which latches it into the
//! channel's [Latch](crate::Latch) if the channel has not reported yet in this cycle. No further
//! processing happens in interrupt context.
//!
//! The [EdgeCapture] is the consumer side. It only reads latches, except for clearing stale
//! channels and the cycle reset, both of which go through the latch protocol and are therefore
//! safe against a concurrent edge.
use super::{age, Capture, ChannelMask, Config, Latches, MAX_CHANNELS};

/// Split latch storage into a recorder for interrupt context and the consumer-side engine.
///
/// # Args
/// * `latches` - Latch storage shared between both halves.
/// * `config` - The capture configuration. Channels beyond [MAX_CHANNELS] are ignored.
pub fn split<'a>(
    latches: &'a Latches,
    config: &Config,
) -> (EdgeRecorder<'a>, EdgeCapture<'a>) {
    latches.clear();
    let channels = config.channels.min(MAX_CHANNELS);
    (
        EdgeRecorder { latches, channels },
        EdgeCapture {
            latches,
            channels,
            window: config.staleness_us,
        },
    )
}

/// The interrupt side of the edge engine.
#[derive(Copy, Clone, Debug)]
pub struct EdgeRecorder<'a> {
    latches: &'a Latches,
    channels: usize,
}

impl EdgeRecorder<'_> {
    /// Record an edge on a channel.
    ///
    /// # Args
    /// * `channel` - The channel the edge arrived on.
    /// * `timestamp` - The microsecond counter at the time of the edge.
    ///
    /// # Returns
    /// True if the edge was latched, false if the channel already reported or is inactive.
    #[inline]
    pub fn record(&self, channel: usize, timestamp: u32) -> bool {
        channel < self.channels && self.latches.channel(channel).set(timestamp)
    }
}

/// The consumer side of the edge engine.
#[derive(Debug)]
pub struct EdgeCapture<'a> {
    latches: &'a Latches,
    channels: usize,
    window: u32,
}

impl EdgeCapture<'_> {
    /// Check whether a reported channel's timestamp has exceeded a staleness window.
    ///
    /// # Args
    /// * `channel` - The channel to check.
    /// * `now` - The current microsecond counter.
    /// * `window` - The maximum permissible age in microseconds.
    pub fn is_stale(&self, channel: usize, now: u32, window: u32) -> bool {
        self.timestamp(channel)
            .is_some_and(|timestamp| age(now, timestamp) > window)
    }

    /// The configured staleness window in microseconds.
    pub fn window(&self) -> u32 {
        self.window
    }
}

impl Capture for EdgeCapture<'_> {
    fn channels(&self) -> usize {
        self.channels
    }

    fn timestamp(&self, channel: usize) -> Option<u32> {
        if channel < self.channels {
            self.latches.channel(channel).get()
        } else {
            None
        }
    }

    fn expire(&mut self, now: u32) -> ChannelMask {
        let mut cleared = 0;
        for channel in 0..self.channels {
            if self.is_stale(channel, now, self.window)
                && self.latches.channel(channel).take().is_some()
            {
                log::debug!("Channel {channel} timeout");
                cleared |= 1 << channel;
            }
        }
        cleared
    }

    fn reset(&mut self) {
        self.latches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(channels: usize) -> Config {
        Config {
            channels,
            ..Default::default()
        }
    }

    #[test]
    fn latch_first_edge() {
        let latches = Latches::new();
        let (recorder, capture) = split(&latches, &config(2));
        assert!(recorder.record(1, 100));
        assert!(!recorder.record(1, 150));
        assert!(!recorder.record(2, 150));
        assert_eq!(capture.timestamp(0), None);
        assert_eq!(capture.timestamp(1), Some(100));
        assert_eq!(capture.reported(), 0b10);
    }

    #[test]
    fn staleness() {
        let latches = Latches::new();
        let (recorder, mut capture) = split(&latches, &config(3));
        recorder.record(0, 1_000);
        recorder.record(1, 400_000);

        assert!(!capture.is_stale(0, 501_000, 500_000));
        assert!(capture.is_stale(0, 501_001, 500_000));
        assert!(!capture.is_stale(2, 501_001, 500_000));

        assert_eq!(capture.expire(501_001), 0b01);
        assert_eq!(capture.reported(), 0b10);

        // The channel is free to latch again.
        assert!(recorder.record(0, 502_000));
    }

    #[test]
    fn edge_after_now_is_fresh() {
        let latches = Latches::new();
        let (recorder, mut capture) = split(&latches, &config(1));
        recorder.record(0, 2_000);
        assert!(!capture.is_stale(0, 1_999, 0));
        assert_eq!(capture.expire(1_999), 0);
    }

    #[test]
    fn reset_idempotent() {
        let latches = Latches::new();
        let (recorder, mut capture) = split(&latches, &config(2));
        recorder.record(0, 5);
        capture.reset();
        assert_eq!(capture.reported(), 0);
        capture.reset();
        assert_eq!(capture.reported(), 0);
        assert!(recorder.record(0, 6));
    }

    #[test]
    fn excess_channels_ignored() {
        let latches = Latches::new();
        let (recorder, mut capture) = split(&latches, &config(12));
        assert_eq!(capture.channels(), MAX_CHANNELS);
        assert!(recorder.record(MAX_CHANNELS - 1, 10));
        assert!(!recorder.record(MAX_CHANNELS, 10));
        assert!(!recorder.record(11, 10));
        assert_eq!(capture.timestamp(9), None);
        assert_eq!(capture.expire(u32::MAX / 2), 1 << (MAX_CHANNELS - 1));
    }
}
