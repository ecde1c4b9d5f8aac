use capture::{
    edge, packet, polling, Capture, Config, Cycle, Event, Instant, Latches,
    ResultVector, State, Transport,
};
use fugit::ExtU32;
use rand_core::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

#[derive(Default)]
struct Recorder {
    connected: bool,
    packets: Vec<Vec<u8>>,
}

impl Recorder {
    fn connected() -> Self {
        Self {
            connected: true,
            packets: Vec::new(),
        }
    }
}

impl Transport for Recorder {
    fn notify(&mut self, packet: &[u8]) -> bool {
        if self.connected {
            self.packets.push(packet.to_vec());
        }
        self.connected
    }
}

fn config(channels: usize) -> Config {
    Config {
        channels,
        ..Default::default()
    }
}

fn ms(ms: u32) -> Instant {
    Instant::from_ticks(ms)
}

#[test]
fn three_channel_detection() {
    let latches = Latches::new();
    let (recorder, mut capture) = edge::split(&latches, &config(3));
    let mut cycle = Cycle::new(250.millis());
    let mut transport = Recorder::connected();

    assert!(recorder.record(0, 1000));
    assert!(recorder.record(1, 1050));
    assert_eq!(cycle.update(ms(1), &mut capture, 1100, &mut transport), None);
    assert_eq!(cycle.state(), State::Waiting);

    assert!(recorder.record(2, 1200));
    let event = cycle.update(ms(2), &mut capture, 1250, &mut transport);
    let Some(Event::Detected { result, delivered }) = event else {
        panic!("no detection: {event:?}");
    };
    assert!(delivered);
    assert_eq!(result.delays(), [0, 50, 200]);
    assert_eq!(result.slots()[3..], [ResultVector::UNUSED; 5]);
    assert_eq!(cycle.state(), State::Cooldown { until: ms(252) });

    assert_eq!(transport.packets.len(), 1);
    let data = packet::Data::decode(&transport.packets[0]).unwrap();
    assert_eq!(data.delays, [0, 50, 200, 0, 0, 0, 0, 0]);

    // Published exactly once.
    assert_eq!(cycle.update(ms(100), &mut capture, 2000, &mut transport), None);
    assert_eq!(transport.packets.len(), 1);
    assert_eq!(cycle.statistics().detections, 1);
}

#[test]
fn partial_set_expires() {
    let latches = Latches::new();
    let (recorder, mut capture) = edge::split(&latches, &config(3));
    let mut cycle = Cycle::new(250.millis());
    let mut transport = Recorder::connected();

    recorder.record(0, 0);
    recorder.record(1, 10_000);
    assert_eq!(cycle.update(ms(10), &mut capture, 10_000, &mut transport), None);

    // The third channel arrives 600 ms after the first two.
    recorder.record(2, 610_000);
    assert_eq!(cycle.update(ms(610), &mut capture, 610_000, &mut transport), None);
    assert_eq!(capture.reported(), 0b100);
    assert_eq!(cycle.state(), State::Waiting);
    assert!(transport.packets.is_empty());
}

#[test]
fn stale_channel_clears_despite_others() {
    let latches = Latches::new();
    let (recorder, mut capture) = edge::split(&latches, &config(2));

    recorder.record(0, 0);
    recorder.record(1, 400_000);
    assert!(capture.is_stale(0, 500_001, capture.window()));
    let mut arbiter = capture::Arbiter::new();
    assert!(!arbiter.check_complete(&mut capture, 500_001));
    assert_eq!(capture.reported(), 0b10);
}

#[test]
fn edges_during_cooldown_are_discarded() {
    let latches = Latches::new();
    let (recorder, mut capture) = edge::split(&latches, &config(2));
    let mut cycle = Cycle::new(250.millis());
    let mut transport = Recorder::connected();

    recorder.record(0, 100);
    recorder.record(1, 130);
    assert!(matches!(
        cycle.update(ms(0), &mut capture, 200, &mut transport),
        Some(Event::Detected { .. })
    ));

    // Channels are still latched from the completed detection.
    assert!(!recorder.record(0, 50_000));
    assert!(!recorder.record(1, 60_000));
    assert_eq!(cycle.update(ms(249), &mut capture, 249_000, &mut transport), None);

    assert_eq!(
        cycle.update(ms(250), &mut capture, 250_000, &mut transport),
        Some(Event::Rearmed)
    );
    assert_eq!(capture.reported(), 0);
    assert_eq!(cycle.state(), State::Waiting);

    recorder.record(1, 260_000);
    recorder.record(0, 260_020);
    let Some(Event::Detected { result, .. }) =
        cycle.update(ms(261), &mut capture, 261_000, &mut transport)
    else {
        panic!("no detection");
    };
    assert_eq!(result.delays(), [20, 0]);
    assert_eq!(transport.packets.len(), 2);
}

#[test]
fn cooldown_stamps_do_not_leak() {
    let mut queue = polling::SampleQueue::new();
    let counters = polling::Counters::new();
    let config = Config {
        channels: 2,
        staleness_ticks: 5,
        ..Default::default()
    };
    let (mut sampler, mut capture) = polling::split(&mut queue, &counters, &config);
    let mut cycle = Cycle::new(250.millis());
    let mut transport = Recorder::connected();

    sampler.sample(0b01);
    sampler.sample(0b11);
    assert!(matches!(
        cycle.update(ms(0), &mut capture, counters.ticks(), &mut transport),
        Some(Event::Detected { .. })
    ));

    // The detected stamps age out while the cooldown runs.
    for _ in 0..10 {
        sampler.sample(0);
    }
    assert_eq!(cycle.update(ms(10), &mut capture, counters.ticks(), &mut transport), None);
    assert_eq!(capture.reported(), 0);

    // A rise during the cooldown is stamped but must not survive the rearm.
    sampler.sample(0b01);
    assert_eq!(cycle.update(ms(20), &mut capture, counters.ticks(), &mut transport), None);
    assert_eq!(capture.timestamp(0), Some(13));

    assert_eq!(
        cycle.update(ms(250), &mut capture, counters.ticks(), &mut transport),
        Some(Event::Rearmed)
    );
    assert_eq!(capture.reported(), 0);

    sampler.sample(0);
    sampler.sample(0b10);
    sampler.sample(0b11);
    let Some(Event::Detected { result, .. }) =
        cycle.update(ms(251), &mut capture, counters.ticks(), &mut transport)
    else {
        panic!("no detection");
    };
    assert_eq!(result.delays(), [1, 0]);
    assert_eq!(result.earliest(), 15);
    assert_eq!(transport.packets.len(), 2);
}

#[test]
fn undelivered_result_still_cycles() {
    let latches = Latches::new();
    let (recorder, mut capture) = edge::split(&latches, &config(1));
    let mut cycle = Cycle::new(250.millis());
    let mut transport = Recorder::default();

    recorder.record(0, 42);
    assert_eq!(
        cycle.update(ms(0), &mut capture, 50, &mut transport),
        Some(Event::Detected {
            result: ResultVector::from_timestamps(&[42]).unwrap(),
            delivered: false
        })
    );
    assert_eq!(cycle.statistics().undelivered, 1);
    assert_eq!(
        cycle.update(ms(300), &mut capture, 300_000, &mut transport),
        Some(Event::Rearmed)
    );
}

#[test]
fn reset_is_idempotent() {
    let mut queue = polling::SampleQueue::new();
    let counters = polling::Counters::new();
    let (mut sampler, mut capture) =
        polling::split(&mut queue, &counters, &config(2));

    sampler.sample(0b01);
    capture.drain();
    capture.reset();
    let after_one = (capture.reported(), capture.timestamp(0));
    capture.reset();
    assert_eq!((capture.reported(), capture.timestamp(0)), after_one);
    assert_eq!(after_one, (0, None));
}

#[test]
fn full_queue_drops_samples() {
    let mut queue = polling::SampleQueue::new();
    let counters = polling::Counters::new();
    let (mut sampler, mut capture) =
        polling::split(&mut queue, &counters, &config(2));

    for _ in 0..polling::QUEUE_CAPACITY {
        assert!(sampler.sample(0));
    }
    assert_eq!(capture.pending(), polling::QUEUE_CAPACITY);
    assert_eq!(counters.dropped(), 0);

    assert!(!sampler.sample(0b11));
    assert!(!sampler.sample(0b11));
    assert_eq!(counters.dropped(), 2);
    assert_eq!(counters.ticks(), polling::QUEUE_CAPACITY as u32 + 2);

    // Sampling continues once the consumer catches up.
    capture.drain();
    assert_eq!(capture.pending(), 0);
    assert!(sampler.sample(0b11));
    capture.drain();
    assert_eq!(capture.timestamp(0), Some(polling::QUEUE_CAPACITY as u32 + 3));
}

#[test]
fn polling_detection() {
    let mut queue = polling::SampleQueue::new();
    let counters = polling::Counters::new();
    let config = Config {
        channels: 3,
        pins: [2, 5, 11, 0, 1, 3, 4, 6],
        ..Default::default()
    };
    let (mut sampler, mut capture) = polling::split(&mut queue, &counters, &config);
    let mut cycle = Cycle::new(config.cooldown);
    let mut transport = Recorder::connected();

    let mut port = 0u32;
    for tick in 1..=30u32 {
        match tick {
            10 => port |= 1 << 5,
            12 => port |= 1 << 2,
            25 => port |= 1 << 11,
            _ => {}
        }
        sampler.sample(port);
    }

    let Some(Event::Detected { result, delivered }) =
        cycle.update(ms(5), &mut capture, counters.ticks(), &mut transport)
    else {
        panic!("no detection");
    };
    assert!(delivered);
    assert_eq!(result.delays(), [2, 0, 15]);
}

#[test]
fn earliest_channel_is_zero() {
    let mut rng = XorShiftRng::seed_from_u64(0x7d0a);
    for _ in 0..1000 {
        let channels = 1 + (rng.next_u32() % 8) as usize;
        let base = rng.next_u32();
        let timestamps: Vec<u32> = (0..channels)
            .map(|_| base.wrapping_add(rng.next_u32() % 500_000))
            .collect();

        let latches = Latches::new();
        let (recorder, mut capture) = edge::split(&latches, &config(channels));
        for (channel, &timestamp) in timestamps.iter().enumerate() {
            assert!(recorder.record(channel, timestamp));
        }

        let mut arbiter = capture::Arbiter::new();
        assert!(arbiter.check_complete(&mut capture, base.wrapping_add(500_000)));
        let result = arbiter.result().unwrap();
        assert_eq!(result.delays().iter().min(), Some(&0));
        assert!(result.delays().iter().all(|&delay| delay >= 0));
        for (delay, timestamp) in result.delays().iter().zip(&timestamps) {
            assert_eq!(
                result.earliest().wrapping_add(*delay as u32),
                *timestamp
            );
        }
    }
}
