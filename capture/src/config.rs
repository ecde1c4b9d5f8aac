use fugit::{ExtU32, MillisDurationU32};

use super::MAX_CHANNELS;

/// Capture configuration, frozen for the lifetime of a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// The number of active channels.
    pub channels: usize,
    /// The sensor line assigned to each channel.
    pub pins: [u8; MAX_CHANNELS],
    /// The sampling rate of the polling engine in Hz.
    pub sample_rate: u32,
    /// Maximum age of an edge-engine timestamp in microseconds.
    pub staleness_us: u32,
    /// Maximum age of a polling-engine timestamp in sample ticks.
    pub staleness_ticks: u32,
    /// Hold-off after a completed detection.
    pub cooldown: MillisDurationU32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            channels: 2,
            pins: [0, 1, 2, 3, 4, 5, 6, 7],
            sample_rate: 10_000,
            staleness_us: 500_000,
            staleness_ticks: 1_000,
            cooldown: 250.millis(),
        }
    }
}

impl Config {
    /// The largest staleness window. Detections spread over more than `i32::MAX` ticks cannot be
    /// told apart from counter wrap.
    pub const MAX_STALENESS: u32 = i32::MAX as u32 / 2;

    /// Clamp the configuration to what the hardware supports.
    ///
    /// # Args
    /// * `lines` - The number of sensor lines available. Pins are line indices below this.
    ///
    /// # Returns
    /// A configuration with `1..=MAX_CHANNELS` channels, a unique in-range line per channel, a
    /// non-zero sample rate and staleness windows of at most [Self::MAX_STALENESS]. Offending
    /// values are replaced and reported as warnings.
    pub fn sanitize(mut self, lines: u8) -> Self {
        let defaults = Self::default();
        // Line sets are tracked as a 32 bit mask.
        let lines = lines.min(u32::BITS as u8);

        if self.channels == 0 || self.channels > MAX_CHANNELS {
            let channels = self.channels.clamp(1, MAX_CHANNELS);
            log::warn!(
                "Channel count {} out of range, using {channels}",
                self.channels
            );
            self.channels = channels;
        }

        let mut used = 0u32;
        for channel in 0..MAX_CHANNELS {
            let pin = self.pins[channel];
            if pin < lines && used & (1 << pin) == 0 {
                used |= 1 << pin;
                continue;
            }

            // Note(unwrap_or): There are at least as many lines as channels in any sane board
            // configuration. Otherwise the channel keeps line 0.
            let free = (0..lines).find(|line| used & (1 << line) == 0).unwrap_or(0);
            if channel < self.channels {
                log::warn!(
                    "Channel {channel} pin {pin} unavailable, using line {free}"
                );
            }
            used |= 1 << free;
            self.pins[channel] = free;
        }

        if self.sample_rate == 0 {
            log::warn!("Zero sample rate, using {}", defaults.sample_rate);
            self.sample_rate = defaults.sample_rate;
        }

        for (name, window) in [
            ("edge", &mut self.staleness_us),
            ("polling", &mut self.staleness_ticks),
        ] {
            if *window > Self::MAX_STALENESS {
                log::warn!(
                    "{name} staleness window {window} too long, using {}",
                    Self::MAX_STALENESS
                );
                *window = Self::MAX_STALENESS;
            }
        }

        self
    }

    /// The bit mask of the sensor lines assigned to active channels.
    pub fn line_mask(&self) -> u32 {
        self.pins[..self.channels]
            .iter()
            .fold(0, |mask, pin| mask | (1 << pin))
    }

    /// Find the channel assigned to a sensor line.
    pub fn channel_of(&self, line: u8) -> Option<usize> {
        self.pins[..self.channels].iter().position(|&pin| pin == line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.channels, 2);
        assert_eq!(config.cooldown, MillisDurationU32::millis(250));
        assert_eq!(config.sanitize(16), config);
        assert_eq!(config.line_mask(), 0b11);
    }

    #[test]
    fn clamp_channels() {
        let config = Config {
            channels: 12,
            ..Default::default()
        }
        .sanitize(16);
        assert_eq!(config.channels, MAX_CHANNELS);

        let config = Config {
            channels: 0,
            ..Default::default()
        }
        .sanitize(16);
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn replace_bad_pins() {
        let config = Config {
            channels: 3,
            pins: [9, 40, 9, 3, 4, 5, 6, 7],
            sample_rate: 0,
            ..Default::default()
        }
        .sanitize(16);
        assert_eq!(config.pins[..3], [9, 0, 1]);
        assert_eq!(config.sample_rate, 10_000);
        assert_eq!(config.channel_of(1), Some(2));
        assert_eq!(config.channel_of(3), None);
        assert_eq!(config.line_mask(), (1 << 9) | 0b11);
    }

    #[test]
    fn clamp_staleness() {
        let config = Config {
            staleness_us: u32::MAX,
            staleness_ticks: Config::MAX_STALENESS + 1,
            ..Default::default()
        }
        .sanitize(16);
        assert_eq!(config.staleness_us, Config::MAX_STALENESS);
        assert_eq!(config.staleness_ticks, Config::MAX_STALENESS);

        let config = Config {
            staleness_ticks: Config::MAX_STALENESS,
            ..Default::default()
        }
        .sanitize(16);
        assert_eq!(config.staleness_ticks, Config::MAX_STALENESS);
    }

    #[test]
    fn wide_port() {
        let config = Config {
            channels: 2,
            pins: [33, 31, 2, 3, 4, 5, 6, 7],
            ..Default::default()
        }
        .sanitize(40);
        assert_eq!(config.pins[..2], [0, 31]);
        assert_eq!(config.line_mask(), 1 << 31 | 1);
    }
}
