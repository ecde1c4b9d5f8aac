//! Detection cycle state machine
//!
//! # Design
//! ```text
//! WAITING --complete--> DETECTED --> COOLDOWN --elapsed--> WAITING
//! ```
//! The result of a completed detection is handed to the transport exactly once on entry into
//! `DETECTED`. The cooldown starts immediately. Edges latched during the cooldown are discarded by
//! the capture reset on the way back to `WAITING`. Partial detections never leave `WAITING`.
use fugit::{MillisDurationU32, TimerInstantU32};

use super::{Arbiter, Capture, ResultVector, Transport};

/// Millisecond timestamps of the cycle scheduler.
pub type Instant = TimerInstantU32<1_000>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Waiting,
    Detected,
    Cooldown { until: Instant },
}

/// Transitions reported to the caller of [Cycle::update].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A detection completed and its result was offered to the transport.
    Detected {
        result: ResultVector,
        delivered: bool,
    },
    /// The cooldown elapsed and capture is armed again.
    Rearmed,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Completed detections.
    pub detections: u32,
    /// Results the transport did not accept.
    pub undelivered: u32,
}

#[derive(Debug)]
pub struct Cycle {
    state: State,
    arbiter: Arbiter,
    cooldown: MillisDurationU32,
    statistics: Statistics,
}

impl Cycle {
    /// Construct the state machine.
    ///
    /// # Args
    /// * `cooldown` - Hold-off after a completed detection before capture rearms.
    pub fn new(cooldown: MillisDurationU32) -> Self {
        Self {
            state: State::Waiting,
            arbiter: Arbiter::new(),
            cooldown,
            statistics: Statistics::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn statistics(&self) -> Statistics {
        self.statistics
    }

    /// Advance the state machine.
    ///
    /// # Note
    /// Must be called periodically from task context. Pending producer output is drained in every
    /// state so that the sample queue keeps moving during the cooldown.
    ///
    /// # Args
    /// * `now` - The current scheduler time.
    /// * `capture` - The capture engine.
    /// * `timestamp` - The current value of the engine's timestamp counter.
    /// * `transport` - The sink for completed results.
    pub fn update<C: Capture, T: Transport>(
        &mut self,
        now: Instant,
        capture: &mut C,
        timestamp: u32,
        transport: &mut T,
    ) -> Option<Event> {
        capture.drain();

        let mut event = None;
        loop {
            match self.state {
                State::Waiting => {
                    if !self.arbiter.check_complete(capture, timestamp) {
                        return event;
                    }
                    let Some(&result) = self.arbiter.result() else {
                        return event;
                    };

                    let delivered = transport.publish(&result);

                    self.statistics.detections =
                        self.statistics.detections.wrapping_add(1);
                    log::info!("Detected: {:?}", result.delays());
                    if !delivered {
                        self.statistics.undelivered =
                            self.statistics.undelivered.wrapping_add(1);
                        log::warn!("Result not delivered");
                    }

                    event = Some(Event::Detected { result, delivered });
                    self.state = State::Detected;
                }
                State::Detected => {
                    self.state = State::Cooldown {
                        until: now + self.cooldown,
                    };
                    return event;
                }
                State::Cooldown { until } => {
                    if now < until {
                        return event;
                    }

                    capture.reset();
                    self.arbiter.reset();
                    self.state = State::Waiting;
                    log::debug!("Rearmed");
                    return Some(Event::Rearmed);
                }
            }
        }
    }
}
