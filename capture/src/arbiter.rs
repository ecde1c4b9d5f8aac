use super::{Capture, MAX_CHANNELS};

/// Per-channel delays of one completed detection, relative to the earliest arrival.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ResultVector {
    delays: [i32; MAX_CHANNELS],
    channels: usize,
    earliest: u32,
}

impl ResultVector {
    /// The value of slots beyond the active channel count.
    pub const UNUSED: i32 = -1;

    /// Construct a result from per-channel arrival timestamps.
    ///
    /// # Args
    /// * `timestamps` - The arrival timestamp of each active channel. At most [MAX_CHANNELS] are
    ///   used.
    ///
    /// # Returns
    /// The result vector, or `None` if no timestamps are given.
    pub fn from_timestamps(timestamps: &[u32]) -> Option<Self> {
        let channels = timestamps.len().min(MAX_CHANNELS);
        let timestamps = &timestamps[..channels];
        let reference = *timestamps.first()?;

        // Offsets relative to an arbitrary member keep the arithmetic wrap-safe.
        let mut offsets = [0i32; MAX_CHANNELS];
        for (offset, timestamp) in offsets.iter_mut().zip(timestamps) {
            *offset = timestamp.wrapping_sub(reference) as i32;
        }
        let earliest = offsets[..channels].iter().copied().min().unwrap_or(0);

        let mut delays = [Self::UNUSED; MAX_CHANNELS];
        for (delay, offset) in delays.iter_mut().zip(&offsets[..channels]) {
            *delay = offset.wrapping_sub(earliest);
        }

        Some(Self {
            delays,
            channels,
            earliest: reference.wrapping_add(earliest as u32),
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The delays of the active channels.
    pub fn delays(&self) -> &[i32] {
        &self.delays[..self.channels]
    }

    /// All slots, including [Self::UNUSED] padding.
    pub fn slots(&self) -> &[i32; MAX_CHANNELS] {
        &self.delays
    }

    /// The timestamp of the earliest arrival.
    pub fn earliest(&self) -> u32 {
        self.earliest
    }
}

/// Detection completion arbitration.
#[derive(Debug, Default)]
pub struct Arbiter {
    result: Option<ResultVector>,
}

impl Arbiter {
    pub const fn new() -> Self {
        Self { result: None }
    }

    /// Check whether all channels have reported.
    ///
    /// # Note
    /// Stale channels are cleared first. Partial state is left untouched otherwise. Once a cycle
    /// has completed, this keeps returning true with the same result until [Arbiter::reset].
    ///
    /// # Args
    /// * `capture` - The capture engine.
    /// * `now` - The current value of the engine's timestamp counter.
    pub fn check_complete(&mut self, capture: &mut impl Capture, now: u32) -> bool {
        if self.result.is_some() {
            return true;
        }

        capture.expire(now);

        let channels = capture.channels().min(MAX_CHANNELS);
        let mut timestamps = [0u32; MAX_CHANNELS];
        for (channel, timestamp) in timestamps[..channels].iter_mut().enumerate() {
            match capture.timestamp(channel) {
                Some(value) => *timestamp = value,
                None => return false,
            }
        }

        self.result = ResultVector::from_timestamps(&timestamps[..channels]);
        self.result.is_some()
    }

    /// The result of the completed cycle.
    pub fn result(&self) -> Option<&ResultVector> {
        self.result.as_ref()
    }

    pub fn reset(&mut self) {
        self.result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_delays() {
        let result = ResultVector::from_timestamps(&[1200, 1000, 1050]).unwrap();
        assert_eq!(result.delays(), [200, 0, 50]);
        assert_eq!(result.earliest(), 1000);
        assert_eq!(result.slots()[3..], [ResultVector::UNUSED; 5]);
    }

    #[test]
    fn ties() {
        let result = ResultVector::from_timestamps(&[7, 7, 9]).unwrap();
        assert_eq!(result.delays(), [0, 0, 2]);
    }

    #[test]
    fn counter_wrap() {
        let result =
            ResultVector::from_timestamps(&[u32::MAX - 10, 5, u32::MAX]).unwrap();
        assert_eq!(result.delays(), [0, 16, 10]);
        assert_eq!(result.earliest(), u32::MAX - 10);
    }

    #[test]
    fn spread_beyond_half_range() {
        // Not a valid detection, but construction must not overflow.
        let result =
            ResultVector::from_timestamps(&[0, 0x7FFF_FFFF, 0x8000_0000]).unwrap();
        assert_eq!(result.earliest(), 0x8000_0000);
        assert_eq!(result.delays()[2], 0);
        assert_eq!(result.delays()[1], -1);
    }

    #[test]
    fn empty() {
        assert_eq!(ResultVector::from_timestamps(&[]), None);
    }
}
