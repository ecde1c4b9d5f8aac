//! Polling capture engine
//!
//! # Design
//! A timer interrupt at the sample rate calls [Sampler::sample] with the raw sensor port levels.
//! The sampler advances the tick counter, maps the port to per-channel levels and enqueues the
//! [Sample] into a bounded single-producer single-consumer queue. It never blocks: when the queue
//! is full the sample is dropped and counted.
//!
//! The [PollingCapture] drains the queue from task context. A channel reports on its first 0→1
//! transition in a cycle, timestamped with the tick at which the sample was taken. After every
//! dequeued sample, reported channels older than the staleness window are cleared
//! independently of each other.
use core::sync::atomic::{AtomicU32, Ordering};

use heapless::spsc::{Consumer, Producer, Queue};

use super::{age, Capture, ChannelMask, Config, MAX_CHANNELS};

/// The number of samples that can be pending between the sampler and the consumer.
pub const QUEUE_CAPACITY: usize = 1024;

// heapless queues hold one element less than their size.
const QUEUE_SIZE: usize = QUEUE_CAPACITY + 1;

pub type SampleQueue = Queue<Sample, QUEUE_SIZE>;

/// One snapshot of all channel levels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sample {
    /// The sample tick at which the levels were read.
    pub tick: u32,
    /// Channel levels, bit `i` representing channel `i`.
    pub levels: ChannelMask,
}

/// Sampling statistics shared between the sampler and housekeeping.
#[derive(Debug, Default)]
pub struct Counters {
    ticks: AtomicU32,
    dropped: AtomicU32,
}

impl Counters {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// The current sample tick.
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// The number of samples dropped due to a full queue since startup.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Split queue storage into the interrupt-side sampler and the consumer-side engine.
///
/// # Args
/// * `queue` - The sample queue.
/// * `counters` - Tick and drop counters.
/// * `config` - The capture configuration. Channels beyond [MAX_CHANNELS] are ignored.
pub fn split<'a>(
    queue: &'a mut SampleQueue,
    counters: &'a Counters,
    config: &Config,
) -> (Sampler<'a>, PollingCapture<'a>) {
    let (producer, consumer) = queue.split();
    let channels = config.channels.min(MAX_CHANNELS);
    (
        Sampler {
            queue: producer,
            counters,
            pins: config.pins,
            channels,
        },
        PollingCapture {
            queue: consumer,
            channels,
            window: config.staleness_ticks,
            stamps: [None; MAX_CHANNELS],
            previous: 0,
        },
    )
}

/// The interrupt side of the polling engine.
pub struct Sampler<'a> {
    queue: Producer<'a, Sample, QUEUE_SIZE>,
    counters: &'a Counters,
    pins: [u8; MAX_CHANNELS],
    channels: usize,
}

impl Sampler<'_> {
    /// Take a sample.
    ///
    /// # Args
    /// * `port` - The raw sensor port levels, bit `n` representing line `n`.
    ///
    /// # Returns
    /// False if the queue was full and the sample was dropped.
    #[inline]
    pub fn sample(&mut self, port: u32) -> bool {
        let tick = self.counters.ticks.load(Ordering::Relaxed).wrapping_add(1);
        self.counters.ticks.store(tick, Ordering::Relaxed);

        let levels = self.pins[..self.channels]
            .iter()
            .enumerate()
            .fold(0, |levels, (channel, &pin)| {
                let level = port.checked_shr(pin.into()).unwrap_or(0) & 1;
                levels | ((level as ChannelMask) << channel)
            });

        if self.queue.enqueue(Sample { tick, levels }).is_err() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            true
        }
    }
}

/// The consumer side of the polling engine.
pub struct PollingCapture<'a> {
    queue: Consumer<'a, Sample, QUEUE_SIZE>,
    channels: usize,
    window: u32,
    stamps: [Option<u32>; MAX_CHANNELS],
    previous: ChannelMask,
}

impl PollingCapture<'_> {
    /// Process a single sample.
    pub fn ingest(&mut self, sample: Sample) {
        let rising = sample.levels & !self.previous;
        self.previous = sample.levels;

        for (channel, stamp) in self.stamps[..self.channels].iter_mut().enumerate() {
            if rising & (1 << channel) != 0 && stamp.is_none() {
                stamp.replace(sample.tick);
            }
        }

        self.expire(sample.tick);
    }

    /// The number of samples waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Capture for PollingCapture<'_> {
    fn channels(&self) -> usize {
        self.channels
    }

    fn timestamp(&self, channel: usize) -> Option<u32> {
        self.stamps.get(channel).copied().flatten()
    }

    fn drain(&mut self) {
        while let Some(sample) = self.queue.dequeue() {
            self.ingest(sample);
        }
    }

    fn expire(&mut self, now: u32) -> ChannelMask {
        let mut cleared = 0;
        for (channel, stamp) in self.stamps[..self.channels].iter_mut().enumerate() {
            if stamp.is_some_and(|tick| age(now, tick) > self.window) {
                log::debug!("Channel {channel} timeout");
                stamp.take();
                cleared |= 1 << channel;
            }
        }
        cleared
    }

    /// The last observed levels are kept so a line held high across the reset does not report
    /// again.
    fn reset(&mut self) {
        self.stamps = [None; MAX_CHANNELS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            channels: 3,
            pins: [4, 0, 9, 1, 2, 3, 5, 6],
            staleness_ticks: 10,
            ..Default::default()
        }
    }

    #[test]
    fn map_lines() {
        let mut queue = SampleQueue::new();
        let counters = Counters::new();
        let (mut sampler, mut capture) = split(&mut queue, &counters, &config());

        assert!(sampler.sample(1 << 9 | 1 << 4 | 1 << 3));
        assert_eq!(capture.pending(), 1);
        assert_eq!(
            capture.queue.dequeue(),
            Some(Sample {
                tick: 1,
                levels: 0b101
            })
        );
    }

    #[test]
    fn rising_edges_only() {
        let mut queue = SampleQueue::new();
        let counters = Counters::new();
        let (mut sampler, mut capture) = split(&mut queue, &counters, &config());

        // Channel 1 (line 0) is high from the start and reports on the first sample.
        sampler.sample(1 << 0);
        sampler.sample(1 << 0);
        // Channel 0 (line 4) rises at tick 3.
        sampler.sample(1 << 0 | 1 << 4);
        capture.drain();

        assert_eq!(capture.timestamp(1), Some(1));
        assert_eq!(capture.timestamp(0), Some(3));
        assert_eq!(capture.timestamp(2), None);

        // A line held high across the reset does not report again.
        capture.reset();
        sampler.sample(1 << 0 | 1 << 4);
        capture.drain();
        assert_eq!(capture.reported(), 0);

        sampler.sample(0);
        sampler.sample(1 << 0);
        capture.drain();
        assert_eq!(capture.timestamp(1), Some(6));
    }

    #[test]
    fn expire_per_channel() {
        let mut queue = SampleQueue::new();
        let counters = Counters::new();
        let (mut sampler, mut capture) = split(&mut queue, &counters, &config());

        sampler.sample(1 << 4);
        for _ in 0..5 {
            sampler.sample(1 << 4);
        }
        sampler.sample(1 << 4 | 1 << 0);
        for _ in 0..4 {
            sampler.sample(1 << 4 | 1 << 0);
        }
        capture.drain();
        // Tick 11: channel 0 is exactly at the window.
        assert_eq!(counters.ticks(), 11);
        assert_eq!(capture.reported(), 0b011);

        sampler.sample(1 << 4 | 1 << 0);
        capture.drain();
        assert_eq!(capture.reported(), 0b010);
        assert_eq!(capture.timestamp(1), Some(7));
    }

    #[test]
    fn excess_channels_ignored() {
        let mut queue = SampleQueue::new();
        let counters = Counters::new();
        let config = Config {
            channels: 12,
            pins: [0, 1, 2, 3, 4, 5, 6, 40],
            ..Default::default()
        };
        let (mut sampler, mut capture) = split(&mut queue, &counters, &config);
        assert_eq!(capture.channels(), MAX_CHANNELS);

        assert!(sampler.sample(u32::MAX));
        capture.drain();
        // Line 40 does not exist and never reads high.
        assert_eq!(capture.reported(), 0x7f);
        assert_eq!(capture.timestamp(9), None);
    }
}
